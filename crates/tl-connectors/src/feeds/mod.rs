//! The four provider connectors and the registry that builds them from
//! configuration.

mod feodo;
mod otx;
mod sslbl;
mod urlhaus;

pub use feodo::FeodoConnector;
pub use otx::OtxConnector;
pub use sslbl::SslblConnector;
pub use urlhaus::UrlhausConnector;

use crate::traits::{Cursor, FeedConfig, FeedConnector, FeedResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tl_core::FeedSource;
use tracing::info;

/// Content-digest cursor for snapshot feeds. An unchanged body hands
/// back the same cursor, so the connector can skip re-emitting it.
pub(crate) fn snapshot_cursor(body: &str) -> Cursor {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    Cursor::new(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Default provider base URL per feed.
pub fn default_base_url(source: FeedSource) -> &'static str {
    match source {
        FeedSource::Otx => "https://otx.alienvault.com",
        FeedSource::Feodo => "https://feodotracker.abuse.ch",
        FeedSource::Sslbl => "https://sslbl.abuse.ch",
        FeedSource::Urlhaus => "https://urlhaus.abuse.ch",
    }
}

/// Connectors built from configuration, plus the feeds that did not
/// start and why. A feed missing from the config, or missing a required
/// API key, is disabled rather than a startup error.
pub struct ConnectorSet {
    pub enabled: Vec<Arc<dyn FeedConnector>>,
    pub disabled: Vec<(FeedSource, String)>,
}

/// Builds connectors for every configured feed.
///
/// # Errors
///
/// Returns [`crate::FeedError::Config`] only for malformed configuration
/// (e.g. a zero rate limit); those are fatal at startup by design.
pub fn build_connectors(configs: &HashMap<FeedSource, FeedConfig>) -> FeedResult<ConnectorSet> {
    let mut enabled: Vec<Arc<dyn FeedConnector>> = Vec::new();
    let mut disabled = Vec::new();

    for source in FeedSource::all() {
        let Some(config) = configs.get(&source) else {
            disabled.push((source, "not configured".to_string()));
            continue;
        };

        match source {
            FeedSource::Otx => {
                let has_key = config
                    .api_key
                    .as_ref()
                    .is_some_and(|key| !key.is_empty());
                if has_key {
                    enabled.push(Arc::new(OtxConnector::new(config.clone())?));
                } else {
                    disabled.push((source, "no api_key configured".to_string()));
                }
            }
            FeedSource::Feodo => enabled.push(Arc::new(FeodoConnector::new(config.clone())?)),
            FeedSource::Sslbl => enabled.push(Arc::new(SslblConnector::new(config.clone())?)),
            FeedSource::Urlhaus => enabled.push(Arc::new(UrlhausConnector::new(config.clone())?)),
        }
    }

    for (source, reason) in &disabled {
        info!(%source, reason, "feed connector disabled");
    }

    Ok(ConnectorSet { enabled, disabled })
}
