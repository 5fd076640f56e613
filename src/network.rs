use crate::NetworkError;
use regex::Regex;
use std::{process::Command, sync::LazyLock};

static SSID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^SSID\s+\d+\s+:\s+(?P<ssid>OpenBCI-.+?)\s*$").expect("Invalid SSID regex")
});

/// Associates the host with the sensor's wireless access point.
pub trait SensorNetwork {
    /// Join the sensor network, returning its SSID.
    fn connect_to_sensor_network(&mut self) -> Result<String, NetworkError>;
}

/// First `OpenBCI-*` SSID in `netsh wlan show networks` output.
pub fn find_sensor_ssid(scan_output: &str) -> Option<String> {
    SSID_REGEX
        .captures(scan_output)
        .map(|c| c["ssid"].trim().to_string())
}

/// Windows WLAN association through `netsh`.
#[derive(Debug, Clone)]
pub struct NetshWifi {
    program: String,
    interface: String,
}

impl Default for NetshWifi {
    fn default() -> Self {
        Self {
            program: "netsh".to_string(),
            interface: "Wi-Fi".to_string(),
        }
    }
}

impl NetshWifi {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, NetworkError> {
        let output = Command::new(&self.program).args(args).output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

impl SensorNetwork for NetshWifi {
    fn connect_to_sensor_network(&mut self) -> Result<String, NetworkError> {
        let scan = self.run(&["wlan", "show", "networks"])?;
        let ssid = find_sensor_ssid(&scan).ok_or(NetworkError::NotVisible)?;
        let output = self.run(&["wlan", "connect", &ssid, &ssid, &self.interface])?;
        if output
            .trim()
            .to_lowercase()
            .starts_with("connection request was completed successfully.")
        {
            Ok(ssid)
        } else {
            Err(NetworkError::Rejected {
                ssid,
                output: output.trim().to_string(),
            })
        }
    }
}
