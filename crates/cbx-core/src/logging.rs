//! Process-wide `tracing` setup for the feed.
//!
//! Console output always; a daily-rotated file under `log_dir` when one is
//! configured. Either sink can be human-readable text or one JSON object per
//! line. `RUST_LOG` wins over the configured level.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Line format shared by the console and file sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?} (expected text or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer().with_target(true);
    match format {
        LogFormat::Text => layer.with_ansi(true).boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Daily-rotated `<dir>/<module_name>.<date>` file.
fn file_layer(dir: &str, module_name: &str, format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(tracing_appender::rolling::daily(dir, module_name))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber. Call once, before the feeds start.
///
/// `log_level` is an `EnvFilter` directive (`"info"`, `"cbx_md=debug"`)
/// used when `RUST_LOG` is unset.
pub fn init_logging(
    log_level: &str,
    log_dir: Option<&str>,
    module_name: &str,
    format: LogFormat,
) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|e| anyhow::anyhow!("invalid log level {log_level:?}: {e}"))?,
    };

    let mut layers = vec![console_layer(format)];
    if let Some(dir) = log_dir {
        layers.push(file_layer(dir, module_name, format));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialized: {e}"))
}
