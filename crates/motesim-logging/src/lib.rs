//! Structured logging for motesim
//!
//! Builds a `tracing` subscriber from a [`LogConfig`]: pretty or JSONL
//! console output on stderr, optional JSONL file output through
//! `tracing-appender`, and an `EnvFilter` honouring `RUST_LOG`.
//!
//! Every line is stamped with the simulation's virtual time rather than the
//! wall clock (see [`virtual_time`]).
//!
//! # Quick Start
//!
//! ```ignore
//! use motesim_logging::{LogConfig, MotesimSubscriberBuilder};
//!
//! let _guard = MotesimSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```

pub mod config;
pub mod virtual_time;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use virtual_time::{VirtualTime, clear_virtual_now, set_virtual_now, virtual_now};

use std::fs::{self, File};
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Builder for configuring and initializing the motesim logging subscriber
pub struct MotesimSubscriberBuilder {
    config: LogConfig,
}

impl MotesimSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes the file writer on drop and must be held
    /// for the life of the program when file output is enabled.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(self.console_layer());
        }
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(self.jsonl_layer(writer));
            guard = Some(file_guard);
        }

        Registry::default().with(layers).with(env_filter).try_init()?;
        Ok(guard)
    }

    fn console_layer(&self) -> BoxedLayer {
        let console = &self.config.console;
        if console.pretty {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(console.ansi)
                .with_target(true)
                .with_timer(VirtualTime)
                .boxed()
        } else {
            self.jsonl_layer(std::io::stderr)
        }
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_timer(VirtualTime)
            .with_writer(writer)
            .boxed()
    }
}

impl Default for MotesimSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the file writer; `Never` truncates a single file, the others roll
fn file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let io_error = |source| LoggingError::Io {
        path: file_config.directory.clone(),
        source,
    };
    match file_config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&file_config.directory).map_err(io_error)?;
            let path = file_config.directory.join(format!("{}.log", file_config.prefix));
            let file = File::create(&path).map_err(|source| LoggingError::Io { path, source })?;
            Ok(tracing_appender::non_blocking(file))
        }
        RotationStrategy::Daily | RotationStrategy::Hourly => {
            let rotation = if file_config.rotation == RotationStrategy::Daily {
                Rotation::DAILY
            } else {
                Rotation::HOURLY
            };
            let appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(&file_config.prefix)
                .filename_suffix("log")
                .build(&file_config.directory)
                .map_err(|e| io_error(std::io::Error::other(e)))?;
            Ok(tracing_appender::non_blocking(appender))
        }
    }
}

/// Initialize logging for testing (minimal output); ignores a second call
pub fn init_testing() {
    let _ = MotesimSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
