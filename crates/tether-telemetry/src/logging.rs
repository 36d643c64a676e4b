//! Logging configuration and setup.
//!
//! A request crosses two kinds of threads: the dispatcher that owns the
//! stream and the guest workers that hold pins on it. [`ThreadLabels`]
//! controls how those threads show up in each line, and
//! [`LogConfig::with_lifecycle_trace`] turns on the bridge targets that
//! narrate pins, posts and epoch renewals.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::ParseError,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Targets enabled by [`LogConfig::with_lifecycle_trace`].
const LIFECYCLE_DIRECTIVES: [&str; 4] = [
    "tether_bridge::filter=trace",
    "tether_bridge::scheduler=trace",
    "tether_bridge::epoch=debug",
    "tether_guest::runtime=debug",
];

/// Line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event; `filter` and `request_id` become fields.
    Json,
    /// The `tracing-subscriber` default layout.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::ConfigError(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Where lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
}

/// How the emitting thread is shown.
///
/// Dispatcher threads carry their connection name and guest workers carry
/// the tokio worker name, so names alone usually tell the two apart. Ids
/// separate threads that share a name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadLabels {
    /// No thread information.
    Off,
    /// Thread names.
    #[default]
    Names,
    /// Thread ids.
    Ids,
    /// Names and ids.
    NamesAndIds,
}

impl ThreadLabels {
    fn names(self) -> bool {
        matches!(self, Self::Names | Self::NamesAndIds)
    }

    fn ids(self) -> bool {
        matches!(self, Self::Ids | Self::NamesAndIds)
    }
}

/// Logging configuration for a bridge process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level (`"info"`, `"debug"`, ...).
    pub level: String,
    /// Line layout.
    pub format: LogFormat,
    /// Output stream.
    pub target: LogTarget,
    /// Thread labelling.
    pub threads: ThreadLabels,
    /// Prefix lines with a timestamp. Off when the collector stamps them.
    pub timestamps: bool,
    /// ANSI colors; ignored for JSON.
    pub ansi: bool,
    /// Extra `target=level` directives on top of `level`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            threads: ThreadLabels::default(),
            timestamps: true,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Defaults at `level`.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Build from the `[logging]` section of a bridge config.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ConfigError`] if the format is unknown.
    #[cfg(feature = "config")]
    pub fn from_section(section: &tether_config::LoggingSection) -> TelemetryResult<Self> {
        Ok(Self {
            level: section.level.clone(),
            format: section.format.parse()?,
            directives: section.directives.clone(),
            ..Self::default()
        })
    }

    /// Use `format`.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write to `target`.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Label threads with `threads`.
    #[must_use]
    pub fn with_threads(mut self, threads: ThreadLabels) -> Self {
        self.threads = threads;
        self
    }

    /// Add a `target=level` directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Trace filter lifecycles: pin and unpin, teardown waits, scheduled
    /// posts, epoch renewals and guest tag bookkeeping. Thread labels
    /// switch to names and ids so a pin can be matched to its worker.
    #[must_use]
    pub fn with_lifecycle_trace(mut self) -> Self {
        for directive in LIFECYCLE_DIRECTIVES {
            if !self.directives.iter().any(|d| d == directive) {
                self.directives.push(directive.to_owned());
            }
        }
        self.threads = ThreadLabels::NamesAndIds;
        self
    }

    /// Drop timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Drop ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    fn env_filter(&self) -> TelemetryResult<EnvFilter> {
        let config_error = |e: ParseError| TelemetryError::ConfigError(e.to_string());
        let base = EnvFilter::try_new(&self.level).map_err(config_error)?;
        self.directives.iter().try_fold(base, |filter, directive| {
            Ok(filter.add_directive(directive.parse().map_err(config_error)?))
        })
    }

    fn layer<W>(&self, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi && self.format != LogFormat::Json)
            .with_thread_names(self.threads.names())
            .with_thread_ids(self.threads.ids());

        match (self.format, self.timestamps) {
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => layer.compact().boxed(),
            (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
            (LogFormat::Full, true) => layer.boxed(),
            (LogFormat::Full, false) => layer.without_time().boxed(),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::ConfigError`] for a bad level or directive and
/// [`TelemetryError::InitError`] if a global subscriber is already set.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.env_filter()?;
    let layer = match config.target {
        LogTarget::Stdout => config.layer(std::io::stdout),
        LogTarget::Stderr => config.layer(std::io::stderr),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install the default subscriber: `info`, compact, stderr.
///
/// # Errors
///
/// Returns [`TelemetryError::InitError`] if a global subscriber is already
/// set.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}
