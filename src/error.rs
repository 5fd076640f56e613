use thiserror::Error;

/// Failures reported by a [`crate::BoardDriver`].
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("board session is not prepared")]
    NotPrepared,
    #[error("failed to prepare board session: {0}")]
    Session(String),
    #[error("board stream error: {0}")]
    Stream(String),
    #[error("board I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while associating with the wireless sensor network.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("no OpenBCI-XXXX network visible; make sure the WiFi shield is on and booted")]
    NotVisible,
    #[error("connection to {ssid} was rejected: {output}")]
    Rejected { ssid: String, output: String },
    #[error("unable to run network command: {0}")]
    Command(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] confique::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("not connected to a board")]
    NotConnected,
    #[error("already streaming")]
    AlreadyStreaming,
    #[error("sample log is unavailable")]
    LogUnavailable,
    #[error("acquisition thread panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("timestamp formatting error: {0}")]
    Time(#[from] time::error::Format),
}
