//! Unigeo Core - one geocoding contract over many providers
//!
//! This crate provides the provider-independent half of unigeo: the
//! capability-gated adapter, the two remote batch protocols, the concurrent
//! fallback used when a provider has no batch endpoint, and bearer-token
//! caching for client-credentials services.
//!
//! # Main Components
//!
//! - **Adapter**: [`Provider`] trait and the caller-facing [`Geocoder`]
//! - **Batch engines**: job-poll, redirect-chase and concurrent fallback
//! - **Auth**: [`CredentialCache`] and [`ClientCredentials`]
//! - **HTTP**: the [`Transport`] seam, a reqwest implementation and a
//!   scripted one for tests
//!
//! # Example
//!
//! ```no_run
//! use unigeo_core::{Geocoder, Provider, Query, Result};
//!
//! async fn example(provider: impl Provider + 'static) -> Result<()> {
//!     let geocoder = Geocoder::new(provider);
//!     let outcome = geocoder
//!         .batch_geocode(&[Query::from("Berlin"), Query::from("Paris")])
//!         .await?;
//!     assert_eq!(outcome.len(), 2);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod types;

// Re-export main types for convenience
pub use adapter::{BatchGeocode, Capabilities, Geocoder, Provider, ReverseGeocode};
pub use auth::{ClientCredentials, CredentialCache, TOKEN_SAFETY_MARGIN_MS};
pub use batch::{BatchConfig, JobPollBatchEngine, PollPacing, RedirectChaseBatchEngine};
pub use config::{Config, ProviderConfig};
pub use error::{Error, QueryKind, Result};
pub use http::{ReqwestTransport, ScriptedTransport, Transport, TransportConfig, TransportResponse};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use types::{
    BatchEntry, BatchOutcome, Coordinates, Query, RemoteJob, ResultItem, ResultSet,
    StructuredQuery,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
