//! # tl-connectors
//!
//! Feed connectors for Threat Loom: the polling contract, a
//! rate-limited HTTP client, cursor persistence, a seen-record cache,
//! and the four provider connectors (AlienVault OTX and the abuse.ch
//! Feodo Tracker / SSL Blacklist / URLhaus feeds).
//!
//! Connectors emit [`tl_core::RawRecord`]s; everything downstream of
//! the raw payload (normalization, publication) lives in other crates.

pub mod cursor;
pub mod dedupe;
pub mod feeds;
pub mod http;
pub mod secret;
pub mod testing;
pub mod traits;

pub use cursor::{CursorStore, MemoryCursorStore, RedisCursorStore};
pub use dedupe::DedupeCache;
pub use feeds::{
    build_connectors, default_base_url, ConnectorSet, FeodoConnector, OtxConnector,
    SslblConnector, UrlhausConnector,
};
pub use http::HttpClient;
pub use secret::SecretString;
pub use testing::MockFeedConnector;
pub use traits::{
    Cursor, FeedBatch, FeedConfig, FeedConnector, FeedError, FeedHealth, FeedResult,
};
