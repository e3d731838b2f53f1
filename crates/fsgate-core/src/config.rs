// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatcher configuration

use crate::abi;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for path resolution and event delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Symlink hops allowed while resolving one path.
    pub max_symlink_traversals: u32,
    /// Maximum accepted path argument length, including the terminator.
    pub path_max: usize,
    /// Maximum length of a single path component.
    pub name_max: usize,
    /// Deliver [`crate::FsEvent`]s to subscribers.
    pub track_events: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_symlink_traversals: abi::MAX_SYMLINK_TRAVERSALS,
            path_max: abi::PATH_MAX,
            name_max: abi::NAME_MAX,
            track_events: true,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let config: DispatchConfig =
            serde_json::from_slice(bytes).context("parsing dispatcher config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading dispatcher config {}", path.display()))?;
        Self::from_json_bytes(&bytes)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path_max == 0 {
            anyhow::bail!("path_max must be positive");
        }
        if self.name_max == 0 || self.name_max >= self.path_max {
            anyhow::bail!(
                "name_max must be positive and below path_max ({})",
                self.path_max
            );
        }
        Ok(())
    }
}
