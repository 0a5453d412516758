//! Structured logging utilities for bridgeboot
//!
//! All logs use structured fields so bootstrap runs from parallel build
//! workers can be told apart and aggregated.
//!
//! # Log Format Conventions
//!
//! - `service`: The component emitting the event ("store", "builder", "bootstrap")
//! - `operation`: The operation being performed (e.g., "acquire", "publish")
//! - `status`: The result status ("hit", "miss", "built", "error")
//! - `key`: Compiler cache key
//! - `size_bytes`: Artifact size in bytes
//! - `duration_ms`: Wall time of a build
//!
//! # Examples
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     service = "store",
//!     operation = "acquire",
//!     status = "hit",
//!     key = %key,
//!     size_bytes = record.size_bytes,
//!     "compiler bridge cache hit"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "bridgeboot" instead of full module path
struct BridgebootFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for BridgebootFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(
                writer,
                "{}{:5}(bridgeboot)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(bridgeboot): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (BRIDGEBOOT_LOG_FORMAT)
    pub fn from_env() -> Self {
        match std::env::var("BRIDGEBOOT_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Build the level filter
///
/// `RUST_LOG` wins, then the level given on the command line, then `info`.
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "bridgeboot=trace")
/// - `BRIDGEBOOT_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// Logs always go to stderr; stdout carries only command output.
pub fn init(level: Option<&str>) {
    let filter = build_filter(level);

    // try_init: a second initialization (tests, embedders) is not an error
    let result = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(BridgebootFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(BridgebootFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
    }
}

/// Service names for consistent logging
pub mod services {
    pub const STORE: &str = "store";
    pub const LOCK: &str = "lock";
    pub const BUILDER: &str = "builder";
    pub const BOOTSTRAP: &str = "bootstrap";
}

/// Operation names for consistent logging
pub mod operations {
    pub const ACQUIRE: &str = "acquire";
    pub const VERIFY: &str = "verify";
    pub const BUILD: &str = "build";
    pub const PUBLISH: &str = "publish";
    pub const EVICT: &str = "evict";
    pub const DELIVER: &str = "deliver";
}

/// Status values for consistent logging
pub mod status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const SHARED: &str = "shared";
    pub const BUILT: &str = "built";
    pub const CORRUPT: &str = "corrupt";
    pub const WAITING: &str = "waiting";
    pub const STALE: &str = "stale";
    pub const ERROR: &str = "error";
}
