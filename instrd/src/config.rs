//! The daemon's TOML configuration file: which driver instances to
//! start and the `scan` options to hand each one, per §12 of the
//! expanded spec's `Config = value::Table` pattern.

use std::path::Path;

use serde::Deserialize;

use instrument_api::driver::DriverConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "driver", default)]
    pub instances: Vec<DriverInstance>,
}

/// One configured instance of a registered driver. `conn`/`serialcomm`
/// feed `ScanOptions` directly; anything else in the table is handed to
/// the driver verbatim as its `DriverConfig` (unused by either driver in
/// this workspace today, but part of the contract every driver's `init`
/// is free to consult).
#[derive(Debug, Deserialize)]
pub struct DriverInstance {
    pub name: String,
    pub conn: Option<String>,
    pub serialcomm: Option<String>,
    #[serde(flatten)]
    pub extra: DriverConfig,
}

impl Config {
    pub fn load(path: &Path) -> instrument_api::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }
}
