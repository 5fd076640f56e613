use crate::{
    correlate, write_raw_header, AcqError, BciOptions, BoardDriver, BoardLayout, ChannelScaler,
    ConnectionParams, DriverError, LogPaths, RailedCountdown, RailedDetector, RailedPolicy,
    RailedStatus, SampleAssembler, SampleCounter, SamplePersistor, SensorNetwork, HEARTBEAT_EVERY,
};
use log::{debug, warn};
use ndarray::Array2;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

type SharedDriver = Arc<dyn BoardDriver>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    /// No prepared session; only `close` is meaningful.
    Disconnected,
    Idle,
    Streaming,
}

/// Owns a board session and the background thread that turns its raw
/// batches into persisted samples.
pub struct Acquisition {
    options: BciOptions,
    layout: BoardLayout,
    paths: LogPaths,
    driver: SharedDriver,
    connected: bool,
    collecting: Arc<AtomicBool>,
    samples: Arc<AtomicUsize>,
    countdown: Arc<AtomicI32>,
    persistor: Option<SamplePersistor>,
    worker: Option<JoinHandle<SamplePersistor>>,
}

impl Acquisition {
    /// Associate with the sensor network (wifi boards), prepare the driver
    /// session and open the logs.
    ///
    /// Never fails outright: on error the failure is reported to the
    /// diagnostic sink and the value is left [`AcqState::Disconnected`].
    pub fn connect(
        options: BciOptions,
        paths: LogPaths,
        driver: impl BoardDriver + 'static,
        network: Option<&mut dyn SensorNetwork>,
    ) -> Self {
        let driver: SharedDriver = Arc::new(driver);
        let layout = driver.layout();

        options.debug_log(false, &format!("Setting raw capture csv {}", paths.raw.display()));
        options.debug_log(
            false,
            &format!("Setting sample capture csv {}", paths.samples.display()),
        );
        options.debug_log(false, &format!("board: {}", layout.label));

        let opened = Self::open_session(&options, &paths, &layout, driver.as_ref(), network);
        let (connected, persistor) = match opened {
            Ok(persistor) => (true, Some(persistor)),
            Err(e) => {
                options.debug_log(true, &format!("Failed to connect to OpenBCI headset: {e}"));
                (false, None)
            }
        };

        Self {
            options,
            layout,
            paths,
            driver,
            connected,
            collecting: Arc::new(AtomicBool::new(false)),
            samples: Arc::new(AtomicUsize::new(0)),
            countdown: Arc::new(AtomicI32::new(RailedCountdown::INACTIVE)),
            persistor,
            worker: None,
        }
    }

    fn open_session(
        options: &BciOptions,
        paths: &LogPaths,
        layout: &BoardLayout,
        driver: &dyn BoardDriver,
        network: Option<&mut dyn SensorNetwork>,
    ) -> Result<SamplePersistor, AcqError> {
        if let Some(dir) = paths.samples.parent() {
            std::fs::create_dir_all(dir)?;
        }
        write_raw_header(&paths.raw, layout)?;

        let board = &options.conf.board;
        if board.wifi && !board.synthetic {
            let network = network.ok_or_else(|| {
                crate::ConfigError::Invalid("wifi selected but no sensor network given".to_string())
            })?;
            let ssid = network.connect_to_sensor_network()?;
            options.debug_log(false, &format!("Joined sensor network {ssid}"));
        }

        let params = ConnectionParams::from_settings(board);
        debug!("{params:?}");
        driver.prepare_session(&params)?;
        if !driver.is_prepared() {
            return Err(DriverError::Session(
                "prepare_session succeeded but session is not prepared".to_string(),
            )
            .into());
        }

        SamplePersistor::create(&paths.samples, &layout.eeg_names, &options.event_names)
    }

    pub fn state(&self) -> AcqState {
        if !self.connected {
            AcqState::Disconnected
        } else if self.is_collecting() {
            AcqState::Streaming
        } else {
            AcqState::Idle
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    /// Samples seen since the last start, including suppressed ones.
    pub fn samples_collected(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    /// Current hysteresis countdown, `-1` when inactive.
    pub fn railed_countdown(&self) -> i32 {
        self.countdown.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn start_stream(&mut self) -> Result<(), AcqError> {
        if !self.connected {
            self.options
                .debug_log(true, "Attempt to start data stream failed as not connected.");
            return Err(AcqError::NotConnected);
        }
        if self.is_collecting() {
            return Err(AcqError::AlreadyStreaming);
        }
        self.reclaim_worker();
        if self.persistor.is_none() {
            self.options
                .debug_log(true, "Cannot start data stream: sample log is unavailable.");
            return Err(AcqError::LogUnavailable);
        }

        let buffer_size = self.options.conf.board.buffer_size;
        let started = self
            .driver
            .start_streaming(buffer_size, Some(self.paths.raw.as_path()));
        if let Err(e) = started {
            self.options.debug_log(true, &format!("Failed to start data stream: {e}"));
            return Err(e.into());
        }

        let Some(persistor) = self.persistor.take() else {
            return Err(AcqError::LogUnavailable);
        };
        self.samples.store(0, Ordering::SeqCst);
        self.countdown.store(RailedCountdown::INACTIVE, Ordering::SeqCst);
        self.collecting.store(true, Ordering::SeqCst);

        let worker = Worker::new(self, persistor);
        self.options.debug_log(false, "Starting data collection thread.");
        match thread::Builder::new()
            .name("bci-acquisition".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.collecting.store(false, Ordering::SeqCst);
                self.options.debug_log(true, &format!("Unable to spawn acquisition thread: {e}"));
                Err(e.into())
            }
        }
    }

    /// Clear the collecting flag and stop the driver stream. The worker exits
    /// at its next row or batch boundary.
    pub fn stop_stream(&mut self) -> bool {
        self.options.debug_log(false, "Stopping data stream.");
        self.collecting.store(false, Ordering::SeqCst);
        if !self.connected {
            self.options.debug_log(true, "Cannot stop data stream: not connected.");
            return false;
        }
        match self.driver.stop_streaming() {
            Ok(()) => true,
            Err(e) => {
                self.options.debug_log(true, &format!("Failed to stop data stream: {e}"));
                false
            }
        }
    }

    /// Stop streaming if needed, release the driver session and close the
    /// sample log.
    pub fn close(&mut self) -> bool {
        let mut ok = true;
        if self.is_collecting() {
            ok &= self.stop_stream();
        }
        ok &= self.reclaim_worker();

        let prepared = self.driver.is_prepared();
        self.options.debug_log(
            false,
            &format!("Releasing BCI connection and closing logfile. IsPrepared: {prepared}"),
        );
        if prepared {
            if let Err(e) = self.driver.release_session() {
                self.options.debug_log(true, &format!("Failed to release session: {e}"));
                ok = false;
            }
        }

        if let Some(persistor) = self.persistor.take() {
            if let Err(e) = persistor.close() {
                self.options.debug_log(true, &format!("Failed to close sample log: {e}"));
                ok = false;
            }
        }
        self.connected = false;
        ok
    }

    /// Join a finished worker and take the sample log back.
    fn reclaim_worker(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return true;
        };
        match handle.join() {
            Ok(persistor) => {
                self.persistor = Some(persistor);
                true
            }
            Err(_) => {
                self.options.debug_log(true, &AcqError::WorkerPanicked.to_string());
                false
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.collecting.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("acquisition thread panicked during shutdown");
            }
        }
    }
}

/// Clears the collecting flag however the worker exits, panics included.
struct ClearOnExit(Arc<AtomicBool>);

impl Drop for ClearOnExit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State owned by the background thread for one streaming run.
struct Worker {
    options: BciOptions,
    layout: BoardLayout,
    driver: SharedDriver,
    collecting: Arc<AtomicBool>,
    samples: Arc<AtomicUsize>,
    countdown: Arc<AtomicI32>,
    detector: RailedDetector,
    assembler: SampleAssembler,
    railed: RailedCountdown,
    persistor: SamplePersistor,
    counter: SampleCounter,
    required_rows: usize,
    poll_interval: Duration,
}

impl Worker {
    fn new(acq: &Acquisition, persistor: SamplePersistor) -> Self {
        let conf = &acq.options.conf;
        let layout = acq.layout.clone();
        let scaler = ChannelScaler::from_settings(&conf.scale);
        let required_rows = layout
            .eeg_rows
            .iter()
            .chain(&layout.accel_rows)
            .chain([&layout.timestamp_row])
            .max()
            .map_or(0, |r| r + 1);
        Self {
            detector: RailedDetector::from_settings(&scaler, &conf.railed, layout.sampling_rate),
            assembler: SampleAssembler::new(scaler, &layout),
            railed: RailedCountdown::new(conf.railed.countdown),
            poll_interval: Duration::from_millis(conf.output.poll_interval_ms),
            options: acq.options.clone(),
            layout,
            driver: Arc::clone(&acq.driver),
            collecting: Arc::clone(&acq.collecting),
            samples: Arc::clone(&acq.samples),
            countdown: Arc::clone(&acq.countdown),
            persistor,
            counter: SampleCounter::new(),
            required_rows,
        }
    }

    fn run(mut self) -> SamplePersistor {
        let _clear = ClearOnExit(Arc::clone(&self.collecting));
        self.options
            .debug_log(false, "Entering data collection thread. Starting data stream.");
        debug!("Railed window {} samples", self.detector.window());
        if let Err(e) = self.poll() {
            self.options
                .debug_log(true, &format!("Data collection stopped: {e}"));
        }
        self.options.debug_log(
            false,
            &format!(
                "Leaving data collection thread: {} samples, {:.1} samples/s average",
                self.counter.n_samples,
                self.counter.average_rate()
            ),
        );
        self.persistor
    }

    fn poll(&mut self) -> Result<(), AcqError> {
        while self.collecting.load(Ordering::SeqCst) {
            let pulled = self.driver.pull_batch();
            let batch = match pulled {
                Ok(batch) => batch,
                // the stream was stopped underneath a pull
                Err(_) if !self.collecting.load(Ordering::SeqCst) => break,
                Err(e) => return Err(e.into()),
            };
            if batch.ncols() == 0 {
                thread::sleep(self.poll_interval);
                continue;
            }
            self.process_batch(&batch)?;
        }
        Ok(())
    }

    fn process_batch(&mut self, batch: &Array2<f64>) -> Result<(), AcqError> {
        let sink = Arc::clone(&self.options.sink);
        let mask = self.detector.classify(batch, &self.layout.eeg_rows, |channel, e| {
            sink(true, &format!("Railed check failed for electrode {channel}: {e}"));
        });
        self.counter.record(batch.ncols());

        if batch.nrows() < self.required_rows {
            self.options.debug_log(
                true,
                &format!(
                    "Dropping batch of {} samples: {} rows, layout needs {}",
                    batch.ncols(),
                    batch.nrows(),
                    self.required_rows
                ),
            );
            return Ok(());
        }

        let suppress = self.options.conf.railed.policy == RailedPolicy::Suppress;
        for column in 0..batch.ncols() {
            if !self.collecting.load(Ordering::SeqCst) {
                break;
            }
            let id = self.samples.fetch_add(1, Ordering::SeqCst) + 1;
            if id % HEARTBEAT_EVERY == 0 {
                self.options.debug_log(
                    false,
                    &format!(
                        "Heartbeat: timestamp {:.3}, {} samples, {:.1} samples/s",
                        batch[[self.layout.timestamp_row, column]],
                        id,
                        self.counter.rate()
                    ),
                );
            }

            let remaining = self.railed.tick(mask);
            self.countdown.store(remaining, Ordering::SeqCst);
            if suppress && mask != 0 {
                continue;
            }

            let event = correlate(self.options.markers.as_ref());
            let sample = self.assembler.assemble(batch, column, id, mask, event);
            if self.options.conf.output.verbosity > 0 && id < 6 {
                for (channel, &row) in self.layout.eeg_rows.iter().enumerate() {
                    self.options.debug_log(
                        false,
                        &format!(
                            "Sample: {id}  Electrode: {channel}  Raw: {}  Scaled: {}  Railed: {:?}",
                            batch[[row, column]],
                            sample.channel_data()[channel],
                            RailedStatus::from_mask(mask, channel)
                        ),
                    );
                }
            }
            self.persistor.persist(&sample, &*self.options.filter)?;
        }
        Ok(())
    }
}
