// SPDX-License-Identifier: CEPL-1.0
//! Already-parsed settings consumed by backend selection and the present core.
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub title: String,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fullscreen: false,
            title: "vkswap".to_owned(),
        }
    }
}

/// Which surface formats the negotiator is allowed to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatPolicy {
    /// BGRA8 UNORM if offered, else whatever the surface lists first.
    #[default]
    PreferBgraUnorm,
    /// SRGB whitelist only; anything else is a fatal error.
    StrictSrgb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresentSettings {
    pub vsync: bool,
    /// `None` waits forever on acquire.
    pub acquire_timeout_ms: Option<u64>,
    pub report_interval_ms: u64,
    pub format_policy: FormatPolicy,
}

impl Default for PresentSettings {
    fn default() -> Self {
        Self {
            vsync: true,
            acquire_timeout_ms: None,
            report_interval_ms: 1000,
            format_policy: FormatPolicy::PreferBgraUnorm,
        }
    }
}

impl PresentSettings {
    /// Acquire timeout in nanoseconds, `u64::MAX` meaning unbounded.
    pub fn acquire_timeout_ns(&self) -> u64 {
        match self.acquire_timeout_ms {
            Some(ms) => Duration::from_millis(ms)
                .as_nanos()
                .try_into()
                .unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_acquire_by_default() {
        let p = PresentSettings::default();
        assert_eq!(p.acquire_timeout_ns(), u64::MAX);
        assert!(p.vsync);
    }

    #[test]
    fn finite_acquire_timeout_in_nanoseconds() {
        let p = PresentSettings {
            acquire_timeout_ms: Some(16),
            ..Default::default()
        };
        assert_eq!(p.acquire_timeout_ns(), 16_000_000);
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let w: WindowSettings = toml::from_str("width = 640\nfullscreen = true").unwrap();
        assert_eq!(w.width, 640);
        assert_eq!(w.height, 720);
        assert!(w.fullscreen);

        let p: PresentSettings = toml::from_str("format_policy = \"strict_srgb\"").unwrap();
        assert_eq!(p.format_policy, FormatPolicy::StrictSrgb);
        assert_eq!(p.report_interval_ms, 1000);
    }
}
