//! Battery and climate sensor interfaces

/// Battery gauge
pub trait Battery: Send + Sync {
    /// Remaining charge, percent
    fn energy(&self) -> u8;

    /// Cell voltage, mV
    fn voltage(&self) -> u32;
}

/// One temperature / humidity sample. A missing value means the sensor did
/// not answer for that channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClimateReading {
    /// °C
    pub temperature: Option<f64>,
    /// %RH
    pub humidity: Option<f64>,
}

impl ClimateReading {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none()
    }
}

pub trait TempHumiditySensor: Send + Sync {
    fn read(&self) -> ClimateReading;
}
