use crate::{AcqError, BoardLayout, Sample};
use csv::{Writer, WriterBuilder};
use std::{
    fs::{File, OpenOptions},
    path::Path,
};

/// Appends accepted samples to the session's CSV log, flushing every row.
pub struct SamplePersistor {
    writer: Writer<File>,
    rows: usize,
}

impl SamplePersistor {
    /// Create the log and write its header:
    /// `Timestamp,<eeg names>,AX,AY,AZ,<event names>`.
    pub fn create(
        path: impl AsRef<Path>,
        eeg_names: &[String],
        event_names: &[String],
    ) -> Result<Self, AcqError> {
        let file = File::create(path)?;
        // marker columns vary per row
        let mut writer = WriterBuilder::new().flexible(true).from_writer(file);

        let mut header = vec!["Timestamp".to_string()];
        header.extend(eeg_names.iter().cloned());
        header.extend(["AX", "AY", "AZ"].map(String::from));
        header.extend(event_names.iter().cloned());
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(Self { writer, rows: 0 })
    }

    /// Offer `sample` to `filter`; write it only if accepted.
    pub fn persist(
        &mut self,
        sample: &Sample,
        filter: impl Fn(&Sample) -> bool,
    ) -> Result<bool, AcqError> {
        if !filter(sample) {
            return Ok(false);
        }
        self.append(sample)?;
        Ok(true)
    }

    pub fn append(&mut self, sample: &Sample) -> Result<(), AcqError> {
        self.writer.write_record(format_row(sample))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written since the log was opened.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn close(mut self) -> Result<(), AcqError> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn format_row(sample: &Sample) -> Vec<String> {
    let mut row = Vec::with_capacity(1 + sample.channel_data().len() + sample.aux_data().len());
    row.push(format!("{:.6}", sample.timestamp()));
    row.extend(sample.channel_data().iter().map(|v| format!("{v:.6}")));
    row.extend(sample.aux_data().iter().map(|v| format!("{v:.6}")));
    if let Some(events) = sample.event_data() {
        row.extend(events.iter().copied().map(format_marker));
    }
    row
}

/// Two-digit zero padding on the magnitude, so `-3` becomes `-03`.
fn format_marker(value: i32) -> String {
    if value < 0 {
        format!("-{:02}", value.unsigned_abs())
    } else {
        format!("{value:02}")
    }
}

/// Create the raw log with one column name per board row. The driver appends
/// rows to it once streaming starts.
pub fn write_raw_header(path: impl AsRef<Path>, layout: &BoardLayout) -> Result<(), AcqError> {
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(layout.raw_header())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoardKind, ChannelScaler, SampleAssembler};
    use ndarray::Array2;

    fn samples(n: usize, events: &[Option<Vec<i32>>]) -> Vec<Sample> {
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        let mut assembler = SampleAssembler::new(ChannelScaler::default(), &layout);
        let mut batch = Array2::<f64>::zeros((layout.num_rows, n));
        for col in 0..n {
            batch[[layout.timestamp_row, col]] = 100.0 + col as f64 * 0.5;
            batch[[layout.eeg_rows[0], col]] = col as f64;
            batch[[layout.accel_rows[0], col]] = 16.0;
        }
        (0..n)
            .map(|col| {
                let event = events.get(col).cloned().flatten();
                assembler.assemble(&batch, col, col + 1, 0, event)
            })
            .collect()
    }

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_is_written_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let persistor =
            SamplePersistor::create(&path, &names(&["Fp1", "Fp2"]), &names(&["Stim"])).unwrap();
        persistor.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Timestamp,Fp1,Fp2,AX,AY,AZ,Stim\n");
    }

    #[test]
    fn rejecting_filter_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let mut persistor = SamplePersistor::create(&path, &names(&["Fp1"]), &[]).unwrap();
        for s in samples(5, &[]) {
            assert!(!persistor.persist(&s, |_| false).unwrap());
        }
        assert_eq!(persistor.rows(), 0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn accepting_filter_writes_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let mut persistor = SamplePersistor::create(&path, &names(&["Fp1"]), &[]).unwrap();
        for s in samples(4, &[]) {
            assert!(persistor.persist(&s, |_| true).unwrap());
        }
        assert_eq!(persistor.rows(), 4);
        let text = std::fs::read_to_string(&path).unwrap();
        let stamps: Vec<_> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap().to_string())
            .collect();
        assert_eq!(stamps, vec!["0.000000", "0.500000", "1.000000", "1.500000"]);
    }

    #[test]
    fn row_layout() {
        let s = &samples(2, &[None, Some(vec![3, 12])])[1];
        let row = format_row(s);
        assert_eq!(row[0], "0.500000");
        let scaled = ChannelScaler::default().scale(1.0, crate::ChannelClass::Primary);
        assert_eq!(row[1], format!("{scaled:.6}"));
        assert_eq!(row.len(), 1 + 8 + 3 + 2);
        assert_eq!(row[9], "0.002000");
        assert_eq!(&row[12..], &["03".to_string(), "12".to_string()]);
    }

    #[test]
    fn negative_markers_are_padded() {
        let s = &samples(1, &[Some(vec![-3, 0, -120, 7])])[0];
        let row = format_row(s);
        assert_eq!(&row[12..], &["-03", "00", "-120", "07"].map(String::from));
    }

    #[test]
    fn raw_header_lists_board_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let layout = BoardLayout::for_board(BoardKind::Cyton, false, false);
        write_raw_header(&path, &layout).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Packet,Fp1,Fp2,C3,C4,P7,P8,O1,O2,AX,AY,AZ,Other1"));
        assert!(text.trim_end().ends_with("Timestamp,Marker"));
    }
}
