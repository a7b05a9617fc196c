// SPDX-License-Identifier: CEPL-1.0
//! `vkswap.toml`: a `[window]` and a `[present]` table, both optional.
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};
use vkswap_core::{PresentSettings, WindowSettings};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowSettings,
    pub present: PresentSettings,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file or bad contents fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}
