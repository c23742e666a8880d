//! Logging and tracing configuration for ewfio
//!
//! This module provides structured logging using the `tracing` crate.
//!
//! Library code only emits events; call `logging::init()` from a binary or
//! test harness to see them. Set `RUST_LOG` to control levels at runtime:
//!
//! ```bash
//! RUST_LOG=ewfio=debug ./mytool       # Debug logs for this crate
//! RUST_LOG=ewfio=trace ./mytool       # Section walk and chunk-level detail
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging/tracing system
///
/// Call this once at application startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("ewfio=debug")
        } else {
            EnvFilter::new("ewfio=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with verbose output (file:line, thread IDs)
pub fn init_verbose() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Check if trace logging is enabled, to skip expensive trace computations
#[inline]
pub fn is_trace_enabled() -> bool {
    tracing::enabled!(Level::TRACE)
}
