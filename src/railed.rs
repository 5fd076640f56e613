use crate::{ChannelScaler, RailedSettings};
use ndarray::{s, Array2};
use serde::Deserialize;
use thiserror::Error;

/// Batches narrower than this are never classified.
pub const MIN_CLASSIFY_COLUMNS: usize = 9;

/// Saturation state of one electrode, as packed into a railed mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RailedStatus {
    NotRailed = 0,
    NearRailed = 1,
    Railed = 2,
}

impl RailedStatus {
    /// Status of channel `index` within a packed mask.
    pub fn from_mask(mask: u32, index: usize) -> Self {
        match (mask >> (2 * index)) & 0b11 {
            1 => Self::NearRailed,
            2 => Self::Railed,
            _ => Self::NotRailed,
        }
    }
}

/// What the acquisition loop does with samples while a batch is railed.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RailedPolicy {
    /// Keep the countdown for visibility, still process every sample.
    Track,
    /// Skip assembly and persistence of samples in railed batches.
    Suppress,
}

#[derive(Error, Debug, PartialEq)]
#[error("channel row {row} is outside the {rows}-row batch")]
pub struct ChannelMissing {
    pub row: usize,
    pub rows: usize,
}

/// Windowed saturation classifier run once per batch.
#[derive(Debug, Clone)]
pub struct RailedDetector {
    full_scale: f64,
    factor: f64,
    window: usize,
    near_percent: f64,
    railed_percent: f64,
}

impl RailedDetector {
    pub fn new(
        scaler: &ChannelScaler,
        window: usize,
        near_percent: f64,
        railed_percent: f64,
    ) -> Self {
        Self {
            full_scale: scaler.full_scale(),
            factor: scaler.primary_factor(),
            window: window.max(1),
            near_percent,
            railed_percent,
        }
    }

    pub fn from_settings(
        scaler: &ChannelScaler,
        settings: &RailedSettings,
        sampling_rate: f64,
    ) -> Self {
        let window = (settings.window_seconds * sampling_rate).round() as usize;
        Self::new(scaler, window, settings.near_percent, settings.railed_percent)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn classify_percentage(&self, percentage: f64) -> RailedStatus {
        if percentage > self.railed_percent {
            RailedStatus::Railed
        } else if percentage > self.near_percent {
            RailedStatus::NearRailed
        } else {
            RailedStatus::NotRailed
        }
    }

    /// Percent of full scale reached by `row` over the trailing window.
    pub fn channel_percentage(
        &self,
        batch: &Array2<f64>,
        row: usize,
    ) -> Result<f64, ChannelMissing> {
        if row >= batch.nrows() {
            return Err(ChannelMissing {
                row,
                rows: batch.nrows(),
            });
        }
        let width = batch.ncols();
        let start = width - self.window.min(width);
        let max = batch
            .slice(s![row, start..])
            .iter()
            .map(|raw| (raw * self.factor).abs())
            .fold(0.0, f64::max);
        Ok(100.0 * max / self.full_scale)
    }

    /// Classify every EEG row of `batch`, two bits per channel.
    ///
    /// A channel whose row cannot be read is reported through `on_error` and
    /// counts as not railed.
    pub fn classify(
        &self,
        batch: &Array2<f64>,
        eeg_rows: &[usize],
        mut on_error: impl FnMut(usize, ChannelMissing),
    ) -> u32 {
        if batch.ncols() < MIN_CLASSIFY_COLUMNS {
            return 0;
        }
        let mut mask = 0;
        for (channel, &row) in eeg_rows.iter().enumerate() {
            match self.channel_percentage(batch, row) {
                Ok(pct) => mask |= (self.classify_percentage(pct) as u32) << (2 * channel),
                Err(e) => on_error(channel, e),
            }
        }
        mask
    }
}

/// Counts down while consecutive samples belong to railed batches.
///
/// Inactive is `-1`. A railed sample arms the counter to its length when
/// inactive and then decrements it; a clean sample resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RailedCountdown {
    length: i32,
    remaining: i32,
}

impl RailedCountdown {
    pub const INACTIVE: i32 = -1;

    pub fn new(length: i32) -> Self {
        Self {
            length,
            remaining: Self::INACTIVE,
        }
    }

    pub fn tick(&mut self, mask: u32) -> i32 {
        if mask == 0 {
            self.remaining = Self::INACTIVE;
        } else {
            if self.remaining == Self::INACTIVE {
                self.remaining = self.length;
            }
            self.remaining -= 1;
        }
        self.remaining
    }

    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    pub fn is_armed(&self) -> bool {
        self.remaining != Self::INACTIVE
    }
}
