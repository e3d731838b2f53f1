// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging configuration types

use crate::{LogFormat, init, parse_level};
use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging verbosity level
    #[serde(rename = "log-level")]
    pub level: Option<String>,

    #[serde(rename = "log-format", default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Install a stdout subscriber for `component` using this configuration.
    pub fn init(&self, component: &str) -> anyhow::Result<()> {
        let level = match &self.level {
            Some(level) => parse_level(level)?,
            None => tracing::Level::INFO,
        };
        init(component, level, self.format)
    }
}
