use log::{error, info};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

/// Fire-and-forget diagnostic callback: `(is_error, message)`.
pub type DiagnosticSink = Arc<dyn Fn(bool, &str) + Send + Sync>;

/// Sink that forwards to the `log` facade.
pub fn log_sink() -> DiagnosticSink {
    Arc::new(|is_error: bool, message: &str| {
        if is_error {
            error!("{message}");
        } else {
            info!("{message}");
        }
    })
}

/// Samples are logged as a heartbeat once every this many.
pub const HEARTBEAT_EVERY: usize = 1000;

/// Sample statistics with both *all-time* totals and a *sliding window* rate.
#[derive(Debug)]
pub struct SampleCounter {
    /// All-time number of samples
    pub n_samples: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    batches: VecDeque<(Instant, usize)>,
    samples_in_window: usize,
}

impl Default for SampleCounter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl SampleCounter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        SampleCounter {
            n_samples: 0,
            t_begin: Instant::now(),
            window,
            batches: VecDeque::new(),
            samples_in_window: 0,
        }
    }

    /// Long-term average since t_begin, in samples/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        self.n_samples as f64 / secs
    }

    /// Rate over the sliding window, in samples/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        self.samples_in_window as f64 / secs
    }

    /// Record a batch of `count` samples.
    pub fn record(&mut self, count: usize) {
        self.record_at(Instant::now(), count);
    }

    fn record_at(&mut self, now: Instant, count: usize) {
        self.n_samples += count;

        self.batches.push_back((now, count));
        self.samples_in_window += count;

        while let Some(&(ts, n)) = self.batches.front() {
            if now.duration_since(ts) > self.window {
                self.batches.pop_front();
                self.samples_in_window -= n;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.n_samples = 0;
        self.t_begin = Instant::now();
        self.batches.clear();
        self.samples_in_window = 0;
    }
}
