use std::str::FromStr;

use intg_errors::HarnessError;

/// Minimum level of events that reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = HarnessError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(HarnessError::config_error(format!("invalid LOG_LEVEL: {level}"))),
        }
    }
}

/// Logging configuration for test processes
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Output format for logs
    pub format: OutputFormat,
    /// Extra `EnvFilter` directives, e.g. `sqlx=warn`
    pub directives: Vec<String>,
    /// Whether to include the module target in each line
    pub include_target: bool,
}

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OutputFormat {
    Json,
    Text,
    Pretty,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: OutputFormat::Text,
            // sqlx logs every statement at info
            directives: vec!["sqlx=warn".to_string()],
            include_target: false,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level_str) = std::env::var("LOG_LEVEL") {
            if let Ok(level) = level_str.parse::<LogLevel>() {
                config.level = level;
            }
        }

        if let Ok(format_str) = std::env::var("LOG_FORMAT") {
            config.format = match format_str.to_lowercase().as_str() {
                "json" => OutputFormat::Json,
                "pretty" => OutputFormat::Pretty,
                _ => OutputFormat::Text,
            };
        }

        if let Ok(include_target) = std::env::var("LOG_TARGET") {
            config.include_target = include_target.to_lowercase() == "true";
        }

        config
    }

    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Full filter string: the base level followed by every extra directive.
    pub fn filter_string(&self) -> String {
        let mut parts = vec![self.level.as_directive().to_string()];
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string_includes_directives() {
        let config = LogConfig::with_level(LogLevel::Debug).with_directive("intg_infrastructure=trace");
        assert_eq!(
            config.filter_string(),
            "debug,sqlx=warn,intg_infrastructure=trace"
        );
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
