//! Global log sink for applications without their own `tracing` setup.
//!
//! A [`JobController`](crate::JobController) created without a logger sends
//! its spans and events to whichever dispatcher is the default at that time,
//! so call [`init`] before building controllers.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Level and destination for [`init`].
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Most verbose level recorded for `parallel_jobs` targets.
    pub level: Level,
    pub target: LogTarget,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: LogTarget::default(),
        }
    }
}

/// Where formatted events are written.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    /// Standard output.
    #[default]
    Console,
    /// A file at this path, truncated on open. ANSI colours are disabled.
    File(String),
}

/// Installs a process-wide subscriber for controller diagnostics.
///
/// Events from `parallel_jobs` are kept up to `config.level`; any `RUST_LOG`
/// directives apply on top. Controllers built before this call keep whatever
/// dispatcher they captured.
///
/// # Errors
///
/// Returns an error when the log file cannot be created or when a global
/// subscriber is already set. Nothing is installed in either case.
pub fn init(config: ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    let directive: Directive = format!("parallel_jobs={}", config.level).parse()?;
    let filter = EnvFilter::from_default_env().add_directive(directive);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.target {
        LogTarget::Console => registry
            .with(fmt::layer().with_writer(std::io::stdout))
            .try_init(),
        LogTarget::File(path) => {
            let file = std::fs::File::create(path)?;
            registry
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .try_init()
        }
    };
    installed.map_err(Into::into)
}
