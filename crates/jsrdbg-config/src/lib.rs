//! Configuration for the jsrdbg debugger core.
//!
//! A [`DebuggerConfig`] is loaded once by the orchestrating process (the probe
//! binary, or an editor integration) and handed down to the components that
//! need it. Logging is configured here as well: library crates only emit
//! `tracing` events, they never install a subscriber themselves.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_ENV_VAR: &str = "JSRDBG_CONFIG";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub source_map: SourceMapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "ConnectionConfig::default_host")]
    pub host: String,

    #[serde(default = "ConnectionConfig::default_port")]
    pub port: u16,

    /// Upper bound for interactive follow-up waits (see `ReplySlot` in
    /// `jsrdbg-wire`). Requests sent over the connection itself never time out.
    #[serde(default = "ConnectionConfig::default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    /// Capacity of the broadcast channel carrying unsolicited engine events.
    #[serde(default = "ConnectionConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl ConnectionConfig {
    fn default_host() -> String {
        "localhost".to_owned()
    }

    fn default_port() -> u16 {
        8089
    }

    fn default_prompt_timeout_ms() -> u64 {
        10_000
    }

    fn default_event_capacity() -> usize {
        64
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    /// `host:port`, suitable for `tokio::net::lookup_host`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            prompt_timeout_ms: Self::default_prompt_timeout_ms(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMapConfig {
    /// The engine prepends a `debugger;` statement to uploaded scripts, which
    /// shifts every imported chunk one line down in the merged source.
    #[serde(default)]
    pub debug_statement_injected: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Either a plain level (`info`, `debug`, ...) or a full `EnvFilter`
    /// directive string such as `jsrdbg.wire=trace,info`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file in addition to stderr. If the file cannot be
    /// opened, file logging is disabled and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// `level` as `EnvFilter` directives. Bare level names match
    /// case-insensitively and `warning` reads as `warn`; anything else is
    /// passed through as a directive string.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            return Self::default_level();
        }
        if level.eq_ignore_ascii_case("warning") {
            return "warn".to_owned();
        }
        match level.parse::<tracing::Level>() {
            Ok(parsed) => parsed.as_str().to_ascii_lowercase(),
            Err(_) => level.to_owned(),
        }
    }

    /// The configured directives with `RUST_LOG` layered on top. Directives
    /// that fail to parse are skipped; targets nothing matches log at `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = self.directives();
        if let Ok(extra) = std::env::var("RUST_LOG") {
            let extra = extra.trim();
            if !extra.is_empty() {
                directives.push(',');
                directives.push_str(extra);
            }
        }
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(directives)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DebuggerConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Resolve the config the way command line tools do: an explicit path
    /// first, then [`CONFIG_ENV_VAR`], then defaults.
    ///
    /// A file that fails to load is reported through `on_error` and replaced
    /// by defaults so a bad config never prevents a debugging session.
    pub fn resolve(cli_path: Option<PathBuf>, on_error: impl FnOnce(&ConfigError)) -> Self {
        let path = cli_path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
        let Some(path) = path else {
            return Self::default();
        };

        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                on_error(&err);
                Self::default()
            }
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has any effect.
pub fn init_tracing_with_config(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `TestWriter` goes through `eprint!`, which the test harness captures.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Mutex::new(file)));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target: "jsrdbg.config",
                    path = %path.display(),
                    "failed to open log file; file logging is disabled"
                );
            }
        }
    });
}
