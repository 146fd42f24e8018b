//! Configuration validation for Threat Loom.
//!
//! Startup validation so a bad config fails with readable messages
//! before anything connects to Redis or Neo4j.

use crate::config::AppConfig;
use colored::Colorize;
use tl_core::FeedSource;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Critical errors that prevent startup.
    pub errors: Vec<String>,
    /// Warnings that should be addressed but don't prevent startup.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before startup.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the application configuration.
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_redis(config, &mut result);
        Self::validate_neo4j(config, &mut result);
        Self::validate_feeds(config, &mut result);
        Self::validate_consumer(config, &mut result);

        result
    }

    fn validate_redis(config: &AppConfig, result: &mut ValidationResult) {
        let redis = &config.redis;

        if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
            result.add_error(format!(
                "Invalid redis.url '{}'. Must start with redis:// or rediss://",
                redis.url
            ));
        }

        if redis.partitions == 0 {
            result.add_error("redis.partitions must be at least 1".to_string());
        }

        if redis.stream_max_len < 1000 {
            result.add_warning(format!(
                "redis.stream_max_len {} is very small. Events are trimmed once a \
                 stream exceeds it, so a slow consumer may lose unread history.",
                redis.stream_max_len
            ));
        }
    }

    fn validate_neo4j(config: &AppConfig, result: &mut ValidationResult) {
        let neo4j = &config.neo4j;

        let valid_scheme = ["bolt://", "bolt+s://", "neo4j://", "neo4j+s://"]
            .iter()
            .any(|scheme| neo4j.uri.starts_with(scheme));
        if !valid_scheme {
            result.add_error(format!(
                "Invalid neo4j.uri '{}'. Must start with bolt:// or neo4j:// \
                 (or their +s TLS variants)",
                neo4j.uri
            ));
        }

        if neo4j.password.is_empty() {
            result.add_warning(
                "neo4j.password is empty. This only works against a server with \
                 authentication disabled."
                    .to_string(),
            );
        }

        if neo4j.max_connections == 0 {
            result.add_error("neo4j.max_connections must be at least 1".to_string());
        }
    }

    fn validate_feeds(config: &AppConfig, result: &mut ValidationResult) {
        if config.feeds.is_empty() {
            result.add_warning(
                "No feeds configured. The pipeline will start but ingest nothing; \
                 only seeded records will flow."
                    .to_string(),
            );
        }

        for (source, feed) in &config.feeds {
            if feed.base_url.is_empty() {
                result.add_error(format!("Feed '{source}': base_url must not be empty"));
            }

            if feed.poll_interval_secs == 0 {
                result.add_error(format!(
                    "Feed '{source}': poll_interval_secs must be at least 1"
                ));
            }

            if feed.rate_limit_per_day == 0 {
                result.add_error(format!(
                    "Feed '{source}': rate_limit_per_day must be at least 1"
                ));
            }

            if *source == FeedSource::Otx
                && feed.api_key.as_ref().is_none_or(|k| k.is_empty())
            {
                result.add_warning(format!(
                    "Feed '{source}': OTX requires an api_key. The connector will be \
                     disabled at startup without one."
                ));
            }
        }
    }

    fn validate_consumer(config: &AppConfig, result: &mut ValidationResult) {
        let consumer = &config.consumer;

        if consumer.group.is_empty() {
            result.add_error("consumer.group must not be empty".to_string());
        }

        if consumer.fetch_max_events == 0 {
            result.add_error("consumer.fetch_max_events must be at least 1".to_string());
        }
    }
}
