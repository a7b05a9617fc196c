// SPDX-License-Identifier: CEPL-1.0
//! Destination for driver/validation-layer messages.
//!
//! A sink is handed to context creation and lives as long as the context;
//! nothing here is global.
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

pub trait DiagnosticSink: Send + Sync {
    /// `kind` is a short tag such as "validation" or "performance".
    fn message(&self, severity: Severity, kind: &str, text: &str);
}

/// Routes messages to `tracing` and counts them per severity.
#[derive(Default)]
pub struct TracingSink {
    warnings: AtomicU32,
    errors: AtomicU32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkCounts {
    pub warnings: u32,
    pub errors: u32,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            warnings: self.warnings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn message(&self, severity: Severity, kind: &str, text: &str) {
        match severity {
            Severity::Verbose => tracing::trace!("[vk/{kind}] {text}"),
            Severity::Info => tracing::debug!("[vk/{kind}] {text}"),
            Severity::Warning => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[vk/{kind}] {text}");
            }
            Severity::Error => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("[vk/{kind}] {text}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_warnings_and_errors() {
        let sink = TracingSink::new();
        sink.message(Severity::Verbose, "general", "loader chatter");
        sink.message(Severity::Info, "general", "device created");
        sink.message(Severity::Warning, "performance", "suboptimal layout");
        sink.message(Severity::Error, "validation", "missing barrier");
        sink.message(Severity::Error, "validation", "missing barrier again");

        assert_eq!(
            sink.counts(),
            SinkCounts {
                warnings: 1,
                errors: 2
            }
        );
    }
}
