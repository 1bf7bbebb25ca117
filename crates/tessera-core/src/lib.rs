// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod error;

pub use error::{ApiLevel, RenderError, Stage};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Logs a fatal error naming the stage that failed and hands it back as `anyhow`.
pub fn report_fatal(err: RenderError) -> anyhow::Error {
    tracing::error!(stage = %err.stage(), "fatal: {err}");
    anyhow::Error::new(err)
}
