//! Logging setup on the tracing ecosystem.
//!
//! `RUST_LOG` always wins over the configured level; the config only
//! supplies the default filter when the variable is unset.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Crates covered by the default filter directive.
const PIPELINE_CRATES: &[&str] = &["tl_core", "tl_connectors", "tl_graph", "tl_pipeline", "tl_cli"];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default log level for the pipeline crates.
    pub level: Level,
    /// Emit JSON lines instead of the human-readable format.
    pub json_format: bool,
    /// Emit span open/close events.
    pub include_spans: bool,
    /// Include file and line of the call site.
    pub include_location: bool,
    /// Include the module path.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose plain-text output for local development.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            include_spans: true,
            include_location: true,
            ..Self::default()
        }
    }

    /// JSON output for log aggregation.
    pub fn production() -> Self {
        Self {
            json_format: true,
            ..Self::default()
        }
    }

    /// Parses a level name, falling back to `info`.
    pub fn with_level_str(mut self, level: &str) -> Self {
        self.level = level.parse().unwrap_or(Level::INFO);
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json_format = json;
        self
    }

    fn default_directives(&self) -> String {
        PIPELINE_CRATES
            .iter()
            .map(|krate| format!("{krate}={}", self.level))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initializes logging with the default configuration. Call once at
/// startup.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes logging with the given configuration. Call once at
/// startup.
pub fn init_logging_with_config(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    // The json and plain formatters are different types, so the two
    // branches cannot share a single layer binding.
    let base = tracing_subscriber::fmt::layer()
        .with_span_events(config.span_events())
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_target(config.include_target);

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        registry.with(base.json()).init();
    } else {
        registry.with(base).init();
    }
}

/// Creates a span for one feed's polling activity.
#[macro_export]
macro_rules! feed_span {
    ($source:expr) => {
        tracing::info_span!("feed", source = %$source)
    };
    ($source:expr, $($field:tt)*) => {
        tracing::info_span!("feed", source = %$source, $($field)*)
    };
}

/// Creates a span for one partition worker.
#[macro_export]
macro_rules! partition_span {
    ($topic:expr, $partition:expr) => {
        tracing::info_span!("partition", topic = %$topic, partition = $partition)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_every_crate() {
        let directives = LoggingConfig::default().default_directives();
        for krate in PIPELINE_CRATES {
            assert!(directives.contains(&format!("{krate}=INFO")));
        }
    }

    #[test]
    fn test_development_is_verbose_plain_text() {
        let config = LoggingConfig::development();
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.json_format);
        assert!(config.include_location);
    }

    #[test]
    fn test_production_emits_json() {
        let config = LoggingConfig::production();
        assert!(config.json_format);
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_level_parsing_falls_back_to_info() {
        assert_eq!(
            LoggingConfig::default().with_level_str("trace").level,
            Level::TRACE
        );
        assert_eq!(
            LoggingConfig::default().with_level_str("shouting").level,
            Level::INFO
        );
    }
}
