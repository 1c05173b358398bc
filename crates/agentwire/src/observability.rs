use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "agentwire.logs.jsonl";

/// Destination for log lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr; stdout stays free for replies.
    Stderr,
    /// One JSON object per line, appended to this file.
    JsonFile(PathBuf),
}

/// Log subscriber settings read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directive such as `info` or `agentwire=debug`.
    pub filter: String,
    pub output: LogOutput,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: DEFAULT_FILTER.to_string(),
            output: LogOutput::Stderr,
        }
    }
}

impl LogSettings {
    /// Reads `AGENTWIRE_OBSERVABILITY_ENABLED`, `AGENTWIRE_LOG_LEVEL` (else
    /// `RUST_LOG`) and `AGENTWIRE_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            enabled: value("AGENTWIRE_OBSERVABILITY_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            filter: value("AGENTWIRE_LOG_LEVEL")
                .or_else(|| value("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            output: value("AGENTWIRE_JSON_LOG_PATH")
                .map(|p| LogOutput::JsonFile(PathBuf::from(p)))
                .unwrap_or(LogOutput::Stderr),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Installs the process-wide subscriber from [`LogSettings::from_env`].
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

/// Installs the process-wide subscriber once. Later calls are no-ops, as is a
/// call made after another subscriber was installed.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }

        let (json_layer, console_layer) = match &settings.output {
            LogOutput::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(writer);
                (Some(layer), None)
            }
            LogOutput::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                (None, Some(layer))
            }
        };
        let _ = tracing_subscriber::registry()
            .with(settings.env_filter())
            .with(json_layer)
            .with(console_layer)
            .try_init();
    });
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_info_on_stderr() {
        assert_eq!(settings(&[]), LogSettings::default());
    }

    #[test]
    fn level_override_wins_over_rust_log() {
        assert_eq!(
            settings(&[("RUST_LOG", "warn"), ("AGENTWIRE_LOG_LEVEL", "debug")]).filter,
            "debug"
        );
        assert_eq!(settings(&[("RUST_LOG", "warn")]).filter, "warn");
    }

    #[test]
    fn json_path_and_disable_flag() {
        let parsed = settings(&[
            ("AGENTWIRE_JSON_LOG_PATH", "logs/agentwire.jsonl"),
            ("AGENTWIRE_OBSERVABILITY_ENABLED", " OFF "),
        ]);
        assert!(!parsed.enabled);
        assert_eq!(
            parsed.output,
            LogOutput::JsonFile(PathBuf::from("logs/agentwire.jsonl"))
        );
        assert!(settings(&[("AGENTWIRE_OBSERVABILITY_ENABLED", "maybe")]).enabled);
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        assert_eq!(
            split_log_path(Path::new("run.jsonl")),
            (PathBuf::from("."), "run.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("/var/log/agentwire/run.jsonl")),
            (PathBuf::from("/var/log/agentwire"), "run.jsonl".to_string())
        );
    }
}
