//! Layered configuration: defaults, then an optional TOML file, then
//! `TABULATE_*` environment variables.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "tabulate.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: String,
    pub listen: String,
    pub script_timeout_secs: u64,
    pub memory_limit_mb: usize,
    pub instruction_check_interval: u32,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Config::builder()
            .set_default("database", "tabulate.db")?
            .set_default("listen", "127.0.0.1:8080")?
            .set_default("script_timeout_secs", 30)?
            .set_default("memory_limit_mb", 64)?
            .set_default("instruction_check_interval", 1000)?
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_FILE)).required(path.is_some()))
            .add_source(Environment::with_prefix("TABULATE"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            timeout: Duration::from_secs(self.script_timeout_secs),
            memory_limit: self.memory_limit_mb * 1024 * 1024,
            instruction_check_interval: self.instruction_check_interval.max(1),
        }
    }
}

/// Resource ceilings applied to every script execution.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub memory_limit: usize,
    pub instruction_check_interval: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_limit: 64 * 1024 * 1024,
            instruction_check_interval: 1000,
        }
    }
}
