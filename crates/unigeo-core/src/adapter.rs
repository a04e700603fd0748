//! Capability-gated provider adapter
//!
//! A [`Provider`] declares what it accepts through [`Capabilities`] and
//! exposes optional operations through accessor methods returning trait
//! objects. [`Geocoder`] is the caller-facing adapter: it checks the query
//! against the declared capabilities before any network call and picks the
//! native batch path or the concurrent fallback.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::fallback::geocode_concurrently;
use crate::error::{Error, QueryKind, Result};
use crate::types::{BatchOutcome, Coordinates, Query, ResultSet};

/// Static declaration of the query kinds a provider accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub ipv4: bool,
    pub ipv6: bool,
    pub address: bool,
}

impl Capabilities {
    /// Street-address geocoders: the common case
    pub const ADDRESS_ONLY: Capabilities = Capabilities {
        ipv4: false,
        ipv6: false,
        address: true,
    };

    /// IP-location services
    pub const IP_ONLY: Capabilities = Capabilities {
        ipv4: true,
        ipv6: true,
        address: false,
    };

    pub fn supports(&self, kind: QueryKind) -> bool {
        match kind {
            QueryKind::Ipv4 => self.ipv4,
            QueryKind::Ipv6 => self.ipv6,
            QueryKind::Address => self.address,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::ADDRESS_ONLY
    }
}

/// Reverse geocoding operation
#[async_trait]
pub trait ReverseGeocode: Send + Sync {
    async fn reverse(&self, at: Coordinates) -> Result<ResultSet>;
}

/// Native batch geocoding operation
#[async_trait]
pub trait BatchGeocode: Send + Sync {
    /// Geocode every query; the outcome must have one entry per query
    async fn batch_geocode(&self, queries: &[Query]) -> Result<BatchOutcome>;
}

/// A geocoding provider.
///
/// Single-item forward geocoding is mandatory. Reverse and native batch
/// support are declared by returning `Some` from the matching accessor,
/// usually `Some(self)` for a provider that implements the trait itself.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name used in results and errors
    fn name(&self) -> &str;

    /// Query kinds this provider accepts
    fn capabilities(&self) -> Capabilities;

    /// Provider-specific single-item geocode
    async fn geocode(&self, query: &Query) -> Result<ResultSet>;

    /// Reverse geocoding, when supported
    fn reverse(&self) -> Option<&dyn ReverseGeocode> {
        None
    }

    /// Native batch endpoint, when supported
    fn batch(&self) -> Option<&dyn BatchGeocode> {
        None
    }
}

/// Caller-facing adapter around a provider
#[derive(Clone)]
pub struct Geocoder {
    provider: Arc<dyn Provider>,
}

impl fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geocoder")
            .field("provider", &self.provider.name())
            .field("capabilities", &self.provider.capabilities())
            .finish()
    }
}

impl Geocoder {
    pub fn new<P: Provider + 'static>(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub fn from_arc(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.provider.capabilities()
    }

    /// Check a query against the provider's capabilities without any I/O
    pub fn check_query(&self, query: &Query) -> Result<QueryKind> {
        let kind = query.kind().ok_or_else(|| Error::Validation {
            field: "query".to_string(),
            message: "coordinates cannot be forward geocoded; use reverse".to_string(),
        })?;

        if !self.provider.capabilities().supports(kind) {
            return Err(Error::Capability {
                provider: self.provider.name().to_string(),
                kind,
            });
        }
        Ok(kind)
    }

    /// Forward geocode a single query
    pub async fn geocode(&self, query: impl Into<Query>) -> Result<ResultSet> {
        let query = query.into();
        self.geocode_query(&query).await
    }

    async fn geocode_query(&self, query: &Query) -> Result<ResultSet> {
        let kind = self.check_query(query)?;
        debug!(provider = self.provider.name(), %kind, "geocode");
        self.provider.geocode(query).await
    }

    /// Reverse geocode a coordinate pair
    pub async fn reverse(&self, at: Coordinates) -> Result<ResultSet> {
        let reverse = self.provider.reverse().ok_or_else(|| Error::Unsupported {
            message: format!("{} does not support reverse geocoding", self.provider.name()),
            feature: Some("reverse".to_string()),
        })?;
        debug!(provider = self.provider.name(), lat = at.lat, lon = at.lon, "reverse");
        reverse.reverse(at).await
    }

    /// Geocode many queries.
    ///
    /// Uses the provider's native batch endpoint when it has one, otherwise
    /// runs single-item geocodes concurrently. Either way the outcome has one
    /// entry per query, in input order.
    pub async fn batch_geocode(&self, queries: &[Query]) -> Result<BatchOutcome> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = match self.provider.batch() {
            Some(batch) => {
                info!(
                    provider = self.provider.name(),
                    queries = queries.len(),
                    "native batch geocode"
                );
                batch.batch_geocode(queries).await?
            }
            None => {
                info!(
                    provider = self.provider.name(),
                    queries = queries.len(),
                    "concurrent fallback batch geocode"
                );
                geocode_concurrently(queries, |query| self.geocode_query(query)).await
            }
        };

        if outcome.len() != queries.len() {
            return Err(Error::protocol(format!(
                "{} returned {} batch entries for {} queries",
                self.provider.name(),
                outcome.len(),
                queries.len()
            )));
        }
        Ok(outcome)
    }
}
