use crate::ScaleSettings;

/// Which conversion a board row gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    /// EEG electrode, converted to microvolts.
    Primary,
    /// Accelerometer axis, converted to g.
    Auxiliary,
}

/// Converts raw ADC counts to physical units.
///
/// For the Cyton family the primary multiplier is
/// `reference_voltage / (2^23 - 1) / gain`, applied before the `1e6` volt to
/// microvolt factor, and the accelerometer multiplier is
/// `accel_full_scale / accel_divisor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelScaler {
    volts_per_count: f64,
    accel_per_count: f64,
}

impl Default for ChannelScaler {
    fn default() -> Self {
        Self::new(4.5, 24.0, 0.002, 16.0)
    }
}

impl ChannelScaler {
    pub fn new(
        reference_voltage: f64,
        gain: f64,
        accel_full_scale: f64,
        accel_divisor: f64,
    ) -> Self {
        Self {
            volts_per_count: reference_voltage / (2f64.powi(23) - 1.0) / gain,
            accel_per_count: accel_full_scale / accel_divisor,
        }
    }

    pub fn from_settings(settings: &ScaleSettings) -> Self {
        Self::new(
            settings.reference_voltage,
            settings.gain,
            settings.accel_full_scale,
            settings.accel_divisor,
        )
    }

    pub fn scale(&self, raw: f64, class: ChannelClass) -> f64 {
        match class {
            ChannelClass::Primary => raw * self.volts_per_count * 1e6,
            ChannelClass::Auxiliary => raw * self.accel_per_count,
        }
    }

    /// Microvolts represented by a single primary count.
    pub fn primary_factor(&self) -> f64 {
        self.volts_per_count * 1e6
    }

    /// Magnitude of a primary channel pinned at the top of the 24-bit ADC range.
    pub fn full_scale(&self) -> f64 {
        self.primary_factor() * 2f64.powi(23)
    }
}
