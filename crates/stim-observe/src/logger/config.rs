use std::io::IsTerminal;
use std::str::FromStr;

use crate::logger::LoggerError;

const FORMAT_VAR: &str = "STIM_LOG_FORMAT";
const FILTER_VAR: &str = "STIM_LOG";

/// Where log records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggerFormat {
    /// Human readable lines on stdout.
    #[default]
    Text,
    /// One JSON object per record on stdout.
    Json,
    /// Native systemd journal fields.
    Journald,
}

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "journald" | "journal" if cfg!(all(target_os = "linux", feature = "journald")) => {
                Ok(Self::Journald)
            }
            "journald" | "journal" => Err(LoggerError::JournaldUnavailable),
            _ => Err(LoggerError::UnknownFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `stim_session=debug,info`.
    pub filter: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    /// Override format and filter from `STIM_LOG_FORMAT` / `STIM_LOG` when set.
    pub fn from_env() -> Result<Self, LoggerError> {
        Self::default().with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, LoggerError> {
        if let Some(format) = var(FORMAT_VAR) {
            self.format = format.parse()?;
        }
        if let Some(filter) = var(FILTER_VAR).filter(|f| !f.trim().is_empty()) {
            self.filter = filter;
        }
        Ok(self)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            filter: "info".to_string(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
        }
    }
}
