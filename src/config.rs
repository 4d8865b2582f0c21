//! User configuration, stored as `config.toml` in the working directory.

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::sysex::TransferMode;

const CONFIG_PATH: &str = "config.toml";
/// Highest device id a unit can be set to. 127 addresses every unit.
pub const MAX_DEVICE_ID: u8 = 126;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: u8,
    pub midi_input: Option<String>,
    pub midi_output: Option<String>,
    pub transfer_mode: TransferMode,
    pub ack_timeout_ms: u64,
    pub dump_folder: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: 0,
            midi_input: None,
            midi_output: None,
            transfer_mode: TransferMode::ClosedLoop,
            ack_timeout_ms: 2000,
            dump_folder: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_from(CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let s = std::fs::read_to_string(path)?;
        let c: Self = toml::from_str(&s)?;
        if c.device_id > MAX_DEVICE_ID {
            return Err(format!("device_id must be at most {MAX_DEVICE_ID}").into())
        }
        Ok(c)
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        self.save_to(CONFIG_PATH)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let s = toml::to_string(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Returns the directory of a file path as a string.
pub fn dir_as_string(p: &Path) -> Option<String> {
    p.parent().and_then(|p| p.to_str().map(|s| s.to_owned()))
}
