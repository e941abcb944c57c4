//! Subscriber setup: stderr text output, an optional log file, and the
//! buffered JSON mode that prints every message grouped by level on exit.
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogConfig;

/// Filter directive for a `-d` level. The crate's own target gets the chosen
/// level; dependencies stay at warn until the most verbose setting.
pub fn level_directive(level: u8) -> String {
    match level {
        0 => "warn".to_string(),
        1 | 2 => "warn,s3cp=info".to_string(),
        3 => "warn,s3cp=debug".to_string(),
        _ => "debug,s3cp=trace".to_string(),
    }
}

#[derive(Debug, Default, Clone)]
struct Buffers {
    debug: Vec<String>,
    info: Vec<String>,
    warning: Vec<String>,
    error: Vec<String>,
}

/// Messages collected by the JSON-mode layer.
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Buffers>>,
}

impl LogBuffer {
    fn push(&self, level: &Level, line: String) {
        let mut b = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *level {
            Level::ERROR => b.error.push(line),
            Level::WARN => b.warning.push(line),
            Level::INFO => b.info.push(line),
            _ => b.debug.push(line),
        }
    }

    /// `{"debug":[..],"info":[..],"warning":[..],"error":[..],"return":N}`
    pub fn to_json(&self, return_code: i32) -> String {
        let b = match self.inner.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        serde_json::json!({
            "debug": b.debug,
            "info": b.info,
            "warning": b.warning,
            "error": b.error,
            "return": return_code,
        })
        .to_string()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Layer that renders each event as `YYYY-mm-dd HH:MM:SS message` into a `LogBuffer`.
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl BufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut v = MessageVisitor::default();
        event.record(&mut v);
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.buffer.push(event.metadata().level(), format!("{} {}{}", ts, v.message, v.fields));
    }
}

/// Keeps the file writer flushing and, in JSON mode, owns the buffer.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    buffer: Option<LogBuffer>,
}

impl LogGuard {
    /// In JSON mode, print the buffered object with `return_code` to stdout.
    pub fn finish(self, return_code: i32) {
        if let Some(buf) = &self.buffer {
            println!("{}", buf.to_json(return_code));
        }
    }
}

pub fn init(cfg: &LogConfig) -> anyhow::Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(cfg.level)));

    let console = if cfg.json {
        None
    } else {
        Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
    };

    let (file_layer, file_guard) = match &cfg.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let buffer = cfg.json.then(LogBuffer::default);
    let buffer_layer = buffer.clone().map(BufferLayer::new);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .with(buffer_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LogGuard { _file: file_guard, buffer })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_layer_groups_by_level() {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::registry().with(BufferLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("uploaded {}", "a.txt");
            tracing::warn!(part = 3, "retrying");
            tracing::error!("failed");
            tracing::debug!("details");
        });
        let v: serde_json::Value = serde_json::from_str(&buffer.to_json(1)).expect("json");
        assert_eq!(v["return"], 1);
        assert!(v["info"][0].as_str().unwrap_or_default().ends_with("uploaded a.txt"));
        assert!(v["warning"][0].as_str().unwrap_or_default().contains("retrying part=3"));
        assert_eq!(v["error"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(v["debug"].as_array().map(|a| a.len()), Some(1));
    }

    #[test]
    fn verbosity_directives() {
        assert_eq!(level_directive(0), "warn");
        assert!(level_directive(2).contains("s3cp=info"));
        assert!(level_directive(9).contains("s3cp=trace"));
    }
}
