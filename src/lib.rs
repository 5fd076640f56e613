//! Acquisition and conditioning of OpenBCI Cyton EEG streams.
//!
//! A background thread pulls raw batches from a [`BoardDriver`], classifies
//! electrode saturation once per batch, scales each sample to microvolts,
//! attaches pending experiment markers and appends the samples the experiment
//! keeps to a CSV log.

mod acquisition;
mod board;
mod config;
mod driver;
mod error;
mod marker;
mod network;
mod railed;
mod sample;
mod scale;
mod utils;
mod writer;

pub use acquisition::*;
pub use board::*;
pub use config::*;
pub use driver::*;
pub use error::*;
pub use marker::*;
pub use network::*;
pub use railed::*;
pub use sample::*;
pub use scale::*;
pub use utils::*;
pub use writer::*;
