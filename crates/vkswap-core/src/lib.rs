// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod diag;
pub mod settings;

pub use diag::{DiagnosticSink, Severity, TracingSink};
pub use settings::{FormatPolicy, PresentSettings, WindowSettings};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
