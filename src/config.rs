use crate::{
    log_sink, BoardKind, ConfigError, DiagnosticSink, EventCorrelator, RailedPolicy, Sample,
};
use confique::Config;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use time::{macros::format_description, OffsetDateTime};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub board: BoardSettings,
    #[config(nested)]
    pub scale: ScaleSettings,
    #[config(nested)]
    pub railed: RailedSettings,
    #[config(nested)]
    pub output: OutputSettings,
}

#[derive(Config, Debug, Clone)]
pub struct BoardSettings {
    #[config(default = "cyton")]
    pub kind: BoardKind,
    #[config(default = false)]
    pub synthetic: bool,
    #[config(default = false)]
    pub wifi: bool,
    #[config(default = "", env = "BCI_DAQ_SERIAL_PORT")]
    pub serial_port: String,
    /// Empty means the WiFi shield's default address.
    #[config(default = "")]
    pub ip_address: String,
    /// Zero means the WiFi shield's default port.
    #[config(default = 0)]
    pub ip_port: u16,
    #[config(default = "tcp")]
    pub ip_protocol: IpProtocol,
    #[config(default = 0)]
    pub timeout: u32,
    #[config(default = 45000)]
    pub buffer_size: usize,
}

#[derive(Config, Debug, Clone)]
pub struct ScaleSettings {
    #[config(default = 4.5)]
    pub reference_voltage: f64,
    #[config(default = 24.0)]
    pub gain: f64,
    #[config(default = 0.002)]
    pub accel_full_scale: f64,
    #[config(default = 16.0)]
    pub accel_divisor: f64,
}

#[derive(Config, Debug, Clone)]
pub struct RailedSettings {
    /// Samples the hysteresis countdown is armed with.
    #[config(default = 5)]
    pub countdown: i32,
    #[config(default = 1.0)]
    pub window_seconds: f64,
    #[config(default = 75.0)]
    pub near_percent: f64,
    #[config(default = 90.0)]
    pub railed_percent: f64,
    #[config(default = "track")]
    pub policy: RailedPolicy,
}

#[derive(Config, Debug, Clone)]
pub struct OutputSettings {
    #[config(default = "logs")]
    pub logs_folder: String,
    #[config(default = [])]
    pub tags: Vec<String>,
    #[config(default = 0)]
    pub verbosity: u8,
    #[config(default = 5)]
    pub poll_interval_ms: u64,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpProtocol {
    None,
    Udp,
    Tcp,
}

impl Conf {
    /// Load from environment and, if given, a TOML file, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder().env();
        if let Some(path) = path {
            builder = builder.file(path);
        }
        let conf = builder.load()?;
        conf.validate()?;
        Ok(conf)
    }

    /// All defaults, ignoring the environment.
    pub fn defaults() -> Result<Self, ConfigError> {
        Ok(Self::builder().load()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.scale.gain <= 0.0 || self.scale.reference_voltage <= 0.0 {
            return invalid("scale.gain and scale.reference_voltage must be positive");
        }
        if self.scale.accel_divisor == 0.0 {
            return invalid("scale.accel_divisor must be non-zero");
        }
        let railed = &self.railed;
        if !(0.0..=100.0).contains(&railed.near_percent)
            || !(0.0..=100.0).contains(&railed.railed_percent)
        {
            return invalid("railed thresholds must be percentages in 0..=100");
        }
        if railed.near_percent >= railed.railed_percent {
            return invalid("railed.near_percent must be below railed.railed_percent");
        }
        if railed.window_seconds <= 0.0 {
            return invalid("railed.window_seconds must be positive");
        }
        if railed.countdown < 1 {
            return invalid("railed.countdown must be at least 1");
        }
        if self.board.buffer_size == 0 {
            return invalid("board.buffer_size must be non-zero");
        }
        Ok(())
    }
}

/// Per-sample keep/drop decision supplied by the experiment.
pub type SampleFilter = Arc<dyn Fn(&Sample) -> bool + Send + Sync>;

/// Validated configuration plus the collaborators injected by the experiment.
#[derive(Clone)]
pub struct BciOptions {
    pub conf: Conf,
    /// Column names for marker values, appended to the sample log header.
    pub event_names: Vec<String>,
    pub filter: SampleFilter,
    pub sink: DiagnosticSink,
    pub markers: Option<EventCorrelator>,
}

impl BciOptions {
    pub fn new(conf: Conf) -> Self {
        Self {
            conf,
            event_names: Vec::new(),
            filter: Arc::new(|_: &Sample| true),
            sink: log_sink(),
            markers: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Sample) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn with_sink(mut self, sink: DiagnosticSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_markers(mut self, markers: EventCorrelator) -> Self {
        self.markers = Some(markers);
        self
    }

    pub fn with_event_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.event_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn debug_log(&self, error: bool, message: &str) {
        (self.sink)(error, message);
    }
}

/// File locations for one session, all sharing a timestamped stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub samples: PathBuf,
    pub raw: PathBuf,
    pub debug: PathBuf,
    pub driver: PathBuf,
}

impl LogPaths {
    pub fn new(
        folder: impl AsRef<Path>,
        tags: &[String],
        synthetic: bool,
        now: OffsetDateTime,
    ) -> Result<Self, time::error::Format> {
        let stamp = now.format(format_description!(
            "[year]_[month]_[day]_[hour]_[minute]_[second]_[subsecond digits:3]"
        ))?;
        let stem = format!(
            "{}{}{}",
            stamp,
            tags.join("_"),
            if synthetic { "_synthetic" } else { "" }
        );
        let folder = folder.as_ref();
        Ok(Self {
            samples: folder.join(format!("{stem}.csv")),
            raw: folder.join(format!("{stem}_raw.csv")),
            debug: folder.join(format!("{stem}_debug.log")),
            driver: folder.join(format!("{stem}_driver.log")),
        })
    }

    pub fn from_conf(conf: &Conf) -> Result<Self, time::error::Format> {
        Self::new(
            &conf.output.logs_folder,
            &conf.output.tags,
            conf.board.synthetic,
            OffsetDateTime::now_utc(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn defaults_are_valid() {
        let conf = Conf::defaults().unwrap();
        assert_eq!(conf.board.kind, BoardKind::Cyton);
        assert_eq!(conf.board.buffer_size, 45000);
        assert_eq!(conf.railed.countdown, 5);
        assert_eq!(conf.railed.policy, RailedPolicy::Track);
        assert_eq!(conf.scale.gain, 24.0);
        conf.validate().unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut conf = Conf::defaults().unwrap();
        conf.railed.near_percent = 95.0;
        assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_gain() {
        let mut conf = Conf::defaults().unwrap();
        conf.scale.gain = 0.0;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bci.toml");
        std::fs::write(
            &path,
            "[board]\nkind = \"cyton_daisy\"\nwifi = true\n\n\
             [railed]\npolicy = \"suppress\"\ncountdown = 3\n",
        )
        .unwrap();
        let conf = Conf::load(Some(&path)).unwrap();
        assert_eq!(conf.board.kind, BoardKind::CytonDaisy);
        assert!(conf.board.wifi);
        assert_eq!(conf.railed.policy, RailedPolicy::Suppress);
        assert_eq!(conf.railed.countdown, 3);
    }

    #[test]
    fn paths_share_stem() {
        let tags = vec!["p01".to_string(), "oddball".to_string()];
        let now = datetime!(2024-03-05 07:08:09.123 UTC);
        let paths = LogPaths::new("logs", &tags, true, now).unwrap();
        let stem = "2024_03_05_07_08_09_123p01_oddball_synthetic";
        assert_eq!(paths.samples, Path::new("logs").join(format!("{stem}.csv")));
        assert_eq!(paths.raw, Path::new("logs").join(format!("{stem}_raw.csv")));
        assert_eq!(paths.debug, Path::new("logs").join(format!("{stem}_debug.log")));
        assert_eq!(paths.driver, Path::new("logs").join(format!("{stem}_driver.log")));
    }
}
