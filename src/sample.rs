use crate::{BoardLayout, ChannelClass, ChannelScaler};
use ndarray::Array2;

/// One scaled sample, immutable once assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    id: usize,
    channel_data: Vec<f64>,
    aux_data: Vec<f64>,
    timestamp: f64,
    event_data: Option<Vec<i32>>,
    railed_status: u32,
}

impl Sample {
    pub fn id(&self) -> usize {
        self.id
    }

    /// EEG values in microvolts, one per electrode.
    pub fn channel_data(&self) -> &[f64] {
        &self.channel_data
    }

    /// Accelerometer values in g.
    pub fn aux_data(&self) -> &[f64] {
        &self.aux_data
    }

    /// Seconds since the first sample this assembler produced.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn event_data(&self) -> Option<&[i32]> {
        self.event_data.as_deref()
    }

    /// Two bits per electrode, see [`crate::RailedStatus`].
    pub fn railed_status(&self) -> u32 {
        self.railed_status
    }
}

/// Builds samples from batch columns, owning the timestamp baseline.
#[derive(Debug, Clone)]
pub struct SampleAssembler {
    scaler: ChannelScaler,
    eeg_rows: Vec<usize>,
    accel_rows: Vec<usize>,
    timestamp_row: usize,
    baseline: Option<f64>,
}

impl SampleAssembler {
    pub fn new(scaler: ChannelScaler, layout: &BoardLayout) -> Self {
        Self {
            scaler,
            eeg_rows: layout.eeg_rows.clone(),
            accel_rows: layout.accel_rows.clone(),
            timestamp_row: layout.timestamp_row,
            baseline: None,
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn scale_channels(&self, batch: &Array2<f64>, column: usize) -> Vec<f64> {
        self.eeg_rows
            .iter()
            .map(|&row| self.scaler.scale(batch[[row, column]], ChannelClass::Primary))
            .collect()
    }

    /// Assemble the sample at `column` of `batch`.
    ///
    /// Panics if the layout's rows are outside the batch; the acquisition
    /// loop checks batch height before assembling.
    pub fn assemble(
        &mut self,
        batch: &Array2<f64>,
        column: usize,
        id: usize,
        railed_status: u32,
        event_data: Option<Vec<i32>>,
    ) -> Sample {
        let channel_data = self.scale_channels(batch, column);
        let aux_data = self
            .accel_rows
            .iter()
            .map(|&row| self.scaler.scale(batch[[row, column]], ChannelClass::Auxiliary))
            .collect();

        let raw_timestamp = batch[[self.timestamp_row, column]];
        let baseline = *self.baseline.get_or_insert(raw_timestamp);

        Sample {
            id,
            channel_data,
            aux_data,
            timestamp: raw_timestamp - baseline,
            event_data,
            railed_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{marker_queue, BoardKind};

    fn batch(layout: &BoardLayout, timestamps: &[f64]) -> Array2<f64> {
        let mut batch = Array2::<f64>::zeros((layout.num_rows, timestamps.len()));
        for (col, ts) in timestamps.iter().enumerate() {
            batch[[layout.timestamp_row, col]] = *ts;
            batch[[layout.eeg_rows[0], col]] = 1.0;
            batch[[layout.accel_rows[2], col]] = 16.0;
        }
        batch
    }

    #[test]
    fn first_sample_is_baseline() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        let data = batch(&layout, &[1700000000.25, 1700000000.75]);

        let first = assembler.assemble(&data, 0, 1, 0, None);
        let second = assembler.assemble(&data, 1, 2, 0, None);
        assert_eq!(first.timestamp(), 0.0);
        assert_eq!(second.timestamp(), 1700000000.75 - 1700000000.25);
        assert_eq!(assembler.baseline(), Some(1700000000.25));
    }

    #[test]
    fn baseline_is_captured_once() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        assembler.assemble(&batch(&layout, &[10.0]), 0, 1, 0, None);
        let later = assembler.assemble(&batch(&layout, &[12.5]), 0, 2, 0, None);
        assert_eq!(later.timestamp(), 2.5);

        // each stream start gets a fresh assembler
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        assert_eq!(assembler.baseline(), None);
        let restarted = assembler.assemble(&batch(&layout, &[20.0]), 0, 1, 0, None);
        assert_eq!(restarted.timestamp(), 0.0);
    }

    #[test]
    fn scales_channels_and_carries_fields() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let scaler = ChannelScaler::default();
        let mut assembler = SampleAssembler::new(scaler, &layout);
        let sample = assembler.assemble(&batch(&layout, &[0.0]), 0, 7, 0b01, Some(vec![3]));

        assert_eq!(sample.id(), 7);
        assert_eq!(sample.channel_data().len(), 8);
        assert_eq!(sample.channel_data()[0], scaler.scale(1.0, ChannelClass::Primary));
        assert_eq!(sample.channel_data()[1], 0.0);
        assert_eq!(sample.aux_data(), &[0.0, 0.0, 0.002]);
        assert_eq!(sample.railed_status(), 1);
        assert_eq!(sample.event_data(), Some(&[3][..]));
    }

    #[test]
    fn markers_attach_to_successive_samples() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        let data = batch(&layout, &[0.0, 0.004, 0.008]);
        let (tx, correlator) = marker_queue();
        tx.send(vec![10]);
        tx.send(vec![20]);

        let samples: Vec<_> = (0..3)
            .map(|col| assembler.assemble(&data, col, col + 1, 0, correlator.next_marker()))
            .collect();
        assert_eq!(samples[0].event_data(), Some(&[10][..]));
        assert_eq!(samples[1].event_data(), Some(&[20][..]));
        assert_eq!(samples[2].event_data(), None);
    }

    #[test]
    fn no_markers_means_absent_event_data() {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        let data = batch(&layout, &[0.0, 0.004]);
        let (_tx, correlator) = marker_queue();
        for col in 0..2 {
            let sample = assembler.assemble(&data, col, col + 1, 0, correlator.next_marker());
            assert!(sample.event_data().is_none());
        }
    }
}
