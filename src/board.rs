use serde::Deserialize;

const CYTON_EEG_NAMES: [&str; 8] = ["Fp1", "Fp2", "C3", "C4", "P7", "P8", "O1", "O2"];
const DAISY_EEG_NAMES: [&str; 8] = ["F7", "F8", "F3", "F4", "T7", "T8", "P3", "P4"];

/// Supported amplifier boards.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    Cyton,
    CytonDaisy,
}

/// Row mapping of the 2-D raw buffer a board produces.
///
/// Each column of a batch is one sample; each row is one data stream. The
/// layout follows the Cyton packet order: package number, EEG channels,
/// accelerometer, seven "other" rows, three analog rows, timestamp, marker.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardLayout {
    pub label: String,
    pub package_row: usize,
    pub eeg_rows: Vec<usize>,
    pub eeg_names: Vec<String>,
    pub accel_rows: Vec<usize>,
    pub timestamp_row: usize,
    pub num_rows: usize,
    pub sampling_rate: f64,
}

impl BoardLayout {
    pub fn for_board(kind: BoardKind, wifi: bool, synthetic: bool) -> Self {
        let n_eeg = match kind {
            BoardKind::Cyton => 8,
            BoardKind::CytonDaisy => 16,
        };
        let sampling_rate = match (kind, wifi) {
            (_, true) => 1000.0,
            (BoardKind::Cyton, false) => 250.0,
            (BoardKind::CytonDaisy, false) => 125.0,
        };
        let eeg_names = CYTON_EEG_NAMES
            .iter()
            .chain(DAISY_EEG_NAMES.iter())
            .take(n_eeg)
            .map(|s| s.to_string())
            .collect();

        let accel_start = 1 + n_eeg;
        // three accel, seven other, three analog
        let timestamp_row = accel_start + 3 + 7 + 3;

        let mut label = match kind {
            BoardKind::Cyton => "Cyton".to_string(),
            BoardKind::CytonDaisy => "Cyton+Daisy".to_string(),
        };
        if wifi {
            label.push_str(" WiFi");
        }
        if synthetic {
            label.push_str(" (synthetic)");
        }

        Self {
            label,
            package_row: 0,
            eeg_rows: (1..accel_start).collect(),
            eeg_names,
            accel_rows: (accel_start..accel_start + 3).collect(),
            timestamp_row,
            num_rows: timestamp_row + 2,
            sampling_rate,
        }
    }

    /// Column names for the raw log, one per board row.
    pub fn raw_header(&self) -> Vec<String> {
        let mut names = vec![String::new(); self.num_rows];
        names[self.package_row] = "Packet".to_string();
        for (row, name) in self.eeg_rows.iter().zip(&self.eeg_names) {
            names[*row] = name.clone();
        }
        for (row, axis) in self.accel_rows.iter().zip(["AX", "AY", "AZ"]) {
            names[*row] = axis.to_string();
        }
        names[self.timestamp_row] = "Timestamp".to_string();
        if let Some(marker) = names.get_mut(self.timestamp_row + 1) {
            *marker = "Marker".to_string();
        }
        let mut other = 0;
        for name in names.iter_mut().filter(|n| n.is_empty()) {
            other += 1;
            *name = format!("Other{other}");
        }
        names
    }
}
