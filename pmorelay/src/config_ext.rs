//! Extension to read the relay section from pmoconfig
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmorelay::RelayConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let relay = config.get_relay_config()?;
//! println!("Relaying {}", relay.playlist_source);
//! # Ok(())
//! # }
//! ```

use crate::config::RelayConfig;
use anyhow::{Context, Result};
use pmoconfig::Config;
use serde_yaml::Value;

/// Relay accessors on `pmoconfig::Config`
pub trait RelayConfigExt {
    /// Typed `relay` section; missing keys take their default
    fn get_relay_config(&self) -> Result<RelayConfig>;

    /// Replace the whole `relay` section
    fn set_relay_config(&self, relay: &RelayConfig) -> Result<()>;

    fn get_relay_playlist_source(&self) -> Result<String>;

    fn set_relay_playlist_source(&self, source: &str) -> Result<()>;
}

impl RelayConfigExt for Config {
    fn get_relay_config(&self) -> Result<RelayConfig> {
        match self.get_value(&["relay"]) {
            Ok(value) => {
                serde_yaml::from_value(value).context("Invalid relay configuration section")
            }
            Err(_) => Ok(RelayConfig::default()),
        }
    }

    fn set_relay_config(&self, relay: &RelayConfig) -> Result<()> {
        self.set_value(&["relay"], serde_yaml::to_value(relay)?)
    }

    fn get_relay_playlist_source(&self) -> Result<String> {
        match self.get_value(&["relay", "playlist_source"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    fn set_relay_playlist_source(&self, source: &str) -> Result<()> {
        self.set_value(
            &["relay", "playlist_source"],
            Value::String(source.to_string()),
        )
    }
}
