use crate::{BoardLayout, BoardSettings, DriverError, IpProtocol};
use csv::Writer;
use log::{debug, info, warn};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::VecDeque,
    f64::consts::PI,
    fs::{File, OpenOptions},
    path::Path,
    sync::{Mutex, MutexGuard},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

pub const DEFAULT_WIFI_ADDRESS: &str = "192.168.4.1";
pub const DEFAULT_WIFI_PORT: u16 = 6677;

/// Parameters handed to the driver when preparing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub serial_port: String,
    pub ip_address: String,
    pub ip_port: u16,
    pub ip_protocol: IpProtocol,
    pub timeout: u32,
}

impl ConnectionParams {
    pub fn from_settings(board: &BoardSettings) -> Self {
        let mut params = Self {
            serial_port: String::new(),
            ip_address: String::new(),
            ip_port: 0,
            ip_protocol: IpProtocol::None,
            timeout: 0,
        };
        if board.synthetic {
            return params;
        }
        if board.wifi {
            params.ip_address = if board.ip_address.is_empty() {
                DEFAULT_WIFI_ADDRESS.to_string()
            } else {
                board.ip_address.clone()
            };
            params.ip_port = if board.ip_port == 0 {
                DEFAULT_WIFI_PORT
            } else {
                board.ip_port
            };
            params.ip_protocol = board.ip_protocol;
            params.timeout = board.timeout;
        } else {
            params.serial_port = board.serial_port.clone();
        }
        params
    }
}

/// Session with an amplifier board that yields batches of raw rows.
///
/// A batch has one row per board data stream (see [`BoardLayout`]) and one
/// column per sample; a batch with no columns means nothing new arrived.
///
/// Methods take `&self` and are called from both the controlling thread and
/// the acquisition thread. `stop_streaming` must not wait for an in-flight
/// `pull_batch` to return.
pub trait BoardDriver: Send + Sync {
    fn layout(&self) -> BoardLayout;
    fn prepare_session(&self, params: &ConnectionParams) -> Result<(), DriverError>;
    fn is_prepared(&self) -> bool;
    /// Begin streaming into a ring buffer of `buffer_size` samples,
    /// optionally appending every raw row to `raw_sink`.
    fn start_streaming(
        &self,
        buffer_size: usize,
        raw_sink: Option<&Path>,
    ) -> Result<(), DriverError>;
    /// Drain everything buffered since the last pull.
    fn pull_batch(&self) -> Result<Array2<f64>, DriverError>;
    fn stop_streaming(&self) -> Result<(), DriverError>;
    fn release_session(&self) -> Result<(), DriverError>;
}

const SYNTHETIC_AMPLITUDE: f64 = 2000.0;
const RAILED_COUNTS: f64 = 8_300_000.0;

/// Software board producing Cyton-shaped data in real time.
pub struct SyntheticBoard {
    layout: BoardLayout,
    railed_channels: Vec<usize>,
    state: Mutex<SyntheticState>,
}

struct SyntheticState {
    rng: StdRng,
    prepared: bool,
    stream: Option<SyntheticStream>,
}

struct SyntheticStream {
    started: Instant,
    epoch: f64,
    generated: usize,
    capacity: usize,
    buffer: VecDeque<Vec<f64>>,
    raw_sink: Option<Writer<File>>,
}

impl SyntheticBoard {
    pub fn new(layout: BoardLayout) -> Self {
        Self::with_rng(layout, StdRng::from_os_rng())
    }

    pub fn seeded(layout: BoardLayout, seed: u64) -> Self {
        Self::with_rng(layout, StdRng::seed_from_u64(seed))
    }

    fn with_rng(layout: BoardLayout, rng: StdRng) -> Self {
        Self {
            layout,
            railed_channels: Vec::new(),
            state: Mutex::new(SyntheticState {
                rng,
                prepared: false,
                stream: None,
            }),
        }
    }

    /// Pin `channel` near the top of the ADC range.
    pub fn rail_channel(mut self, channel: usize) -> Self {
        self.railed_channels.push(channel);
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, SyntheticState>, DriverError> {
        self.state
            .lock()
            .map_err(|_| DriverError::Stream("synthetic board state poisoned".to_string()))
    }

    fn generate(&self, rng: &mut StdRng, index: usize, epoch: f64) -> Vec<f64> {
        let layout = &self.layout;
        let t = index as f64 / layout.sampling_rate;
        let mut row = vec![0.0; layout.num_rows];
        row[layout.package_row] = (index % 256) as f64;
        for (channel, &r) in layout.eeg_rows.iter().enumerate() {
            row[r] = if self.railed_channels.contains(&channel) {
                RAILED_COUNTS
            } else {
                let alpha = (2.0 * PI * 10.0 * t + channel as f64).sin();
                SYNTHETIC_AMPLITUDE * alpha + rng.random_range(-200.0..200.0)
            };
        }
        for (axis, &r) in layout.accel_rows.iter().enumerate() {
            // 1 g on the z axis
            let rest = if axis == 2 { 8000.0 } else { 0.0 };
            row[r] = rest + rng.random_range(-40.0..40.0);
        }
        row[layout.timestamp_row] = epoch + t;
        row
    }
}

impl BoardDriver for SyntheticBoard {
    fn layout(&self) -> BoardLayout {
        self.layout.clone()
    }

    fn prepare_session(&self, params: &ConnectionParams) -> Result<(), DriverError> {
        debug!("Preparing {} session with {params:?}", self.layout.label);
        self.state()?.prepared = true;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.state().map(|s| s.prepared).unwrap_or(false)
    }

    fn start_streaming(
        &self,
        buffer_size: usize,
        raw_sink: Option<&Path>,
    ) -> Result<(), DriverError> {
        let mut state = self.state()?;
        if !state.prepared {
            return Err(DriverError::NotPrepared);
        }
        if state.stream.is_some() {
            return Err(DriverError::Stream("already streaming".to_string()));
        }
        let raw_sink = match raw_sink {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Writer::from_writer(file))
            }
            None => None,
        };
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        state.stream = Some(SyntheticStream {
            started: Instant::now(),
            epoch,
            generated: 0,
            capacity: buffer_size,
            buffer: VecDeque::new(),
            raw_sink,
        });
        info!("Synthetic stream started with a {buffer_size} sample ring buffer");
        Ok(())
    }

    fn pull_batch(&self) -> Result<Array2<f64>, DriverError> {
        let mut guard = self.state()?;
        let SyntheticState { rng, stream, .. } = &mut *guard;
        let stream = stream
            .as_mut()
            .ok_or_else(|| DriverError::Stream("stream not started".to_string()))?;

        let due = (stream.started.elapsed().as_secs_f64() * self.layout.sampling_rate) as usize;
        let mut dropped = 0;
        while stream.generated < due {
            let row = self.generate(rng, stream.generated, stream.epoch);
            stream.generated += 1;
            if stream.buffer.len() == stream.capacity {
                stream.buffer.pop_front();
                dropped += 1;
            }
            stream.buffer.push_back(row);
        }
        if dropped > 0 {
            warn!("Ring buffer full, dropped {dropped} samples");
        }

        let n = stream.buffer.len();
        let mut batch = Array2::<f64>::zeros((self.layout.num_rows, n));
        for (col, row) in stream.buffer.drain(..).enumerate() {
            if let Some(sink) = stream.raw_sink.as_mut() {
                sink.write_record(row.iter().map(|v| v.to_string()))
                    .map_err(|e| DriverError::Stream(e.to_string()))?;
            }
            for (r, value) in row.into_iter().enumerate() {
                batch[[r, col]] = value;
            }
        }
        if let Some(sink) = stream.raw_sink.as_mut() {
            sink.flush()?;
        }
        Ok(batch)
    }

    fn stop_streaming(&self) -> Result<(), DriverError> {
        match self.state()?.stream.take() {
            Some(mut stream) => {
                info!("Synthetic stream stopped after {} samples", stream.generated);
                if let Some(sink) = stream.raw_sink.as_mut() {
                    sink.flush()?;
                }
                Ok(())
            }
            None => Err(DriverError::Stream("stream not started".to_string())),
        }
    }

    fn release_session(&self) -> Result<(), DriverError> {
        let mut state = self.state()?;
        state.stream = None;
        state.prepared = false;
        debug!("Released {} session", self.layout.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoardKind, Conf};
    use std::{thread, time::Duration};

    fn board() -> SyntheticBoard {
        SyntheticBoard::seeded(BoardLayout::for_board(BoardKind::Cyton, false, true), 7)
    }

    #[test]
    fn wifi_params_fall_back_to_shield_defaults() {
        let mut conf = Conf::defaults().unwrap();
        conf.board.wifi = true;
        let params = ConnectionParams::from_settings(&conf.board);
        assert_eq!(params.ip_address, DEFAULT_WIFI_ADDRESS);
        assert_eq!(params.ip_port, DEFAULT_WIFI_PORT);
        assert_eq!(params.ip_protocol, IpProtocol::Tcp);
        assert!(params.serial_port.is_empty());
    }

    #[test]
    fn serial_params_use_port() {
        let mut conf = Conf::defaults().unwrap();
        conf.board.serial_port = "/dev/ttyUSB0".to_string();
        let params = ConnectionParams::from_settings(&conf.board);
        assert_eq!(params.serial_port, "/dev/ttyUSB0");
        assert!(params.ip_address.is_empty());
    }

    #[test]
    fn must_prepare_before_streaming() {
        let b = board();
        assert!(matches!(b.start_streaming(100, None), Err(DriverError::NotPrepared)));
        assert!(b.pull_batch().is_err());
    }

    #[test]
    fn produces_rows_in_layout_shape() {
        let b = board();
        let params = ConnectionParams::from_settings(&Conf::defaults().unwrap().board);
        b.prepare_session(&params).unwrap();
        b.start_streaming(1000, None).unwrap();
        thread::sleep(Duration::from_millis(60));
        let batch = b.pull_batch().unwrap();
        assert_eq!(batch.nrows(), 24);
        assert!(batch.ncols() >= 10);
        let layout = b.layout();
        let ts = batch.row(layout.timestamp_row);
        assert!(ts.windows(2).into_iter().all(|w| w[1] > w[0]));
        b.stop_streaming().unwrap();
        b.release_session().unwrap();
        assert!(!b.is_prepared());
    }

    #[test]
    fn ring_buffer_keeps_newest() {
        let b = board();
        b.prepare_session(&ConnectionParams::from_settings(&Conf::defaults().unwrap().board))
            .unwrap();
        b.start_streaming(5, None).unwrap();
        thread::sleep(Duration::from_millis(100));
        let batch = b.pull_batch().unwrap();
        assert_eq!(batch.ncols(), 5);
    }

    #[test]
    fn appends_raw_rows() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw.csv");
        let b = board();
        b.prepare_session(&ConnectionParams::from_settings(&Conf::defaults().unwrap().board))
            .unwrap();
        b.start_streaming(1000, Some(raw.as_path())).unwrap();
        thread::sleep(Duration::from_millis(40));
        let batch = b.pull_batch().unwrap();
        b.stop_streaming().unwrap();
        let text = std::fs::read_to_string(&raw).unwrap();
        assert_eq!(text.lines().count(), batch.ncols());
    }

    #[test]
    fn railed_channel_sits_near_full_scale() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, true);
        let b = SyntheticBoard::seeded(layout.clone(), 7).rail_channel(2);
        b.prepare_session(&ConnectionParams::from_settings(&Conf::defaults().unwrap().board))
            .unwrap();
        b.start_streaming(1000, None).unwrap();
        thread::sleep(Duration::from_millis(40));
        let batch = b.pull_batch().unwrap();
        assert!(batch.ncols() > 0);
        assert!(batch.row(layout.eeg_rows[2]).iter().all(|&v| v == RAILED_COUNTS));
        assert!(batch.row(layout.eeg_rows[1]).iter().all(|&v| v.abs() < 3000.0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn raw_sink_failure_keeps_stream() {
        let b = board();
        b.prepare_session(&ConnectionParams::from_settings(&Conf::defaults().unwrap().board))
            .unwrap();
        // every write to /dev/full fails with ENOSPC
        b.start_streaming(1000, Some(Path::new("/dev/full"))).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert!(matches!(b.pull_batch(), Err(DriverError::Io(_))));
        // the stream survives, so stop reaches the sink instead of reporting no stream
        assert!(matches!(b.stop_streaming(), Err(DriverError::Io(_))));
        assert!(matches!(b.stop_streaming(), Err(DriverError::Stream(_))));
    }
}
