//! Core data types for unigeo
//!
//! Queries, normalized result records and the batch outcome shape shared by
//! every provider.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryKind;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Structured query with free-form provider fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    /// Free-text address
    pub address: String,

    /// Optional country filter (ISO code or name, provider-dependent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// Additional provider-specific parameters
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

/// Geocoding input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    /// Plain address or IP string
    Address(String),
    /// Coordinate pair
    Coordinates(Coordinates),
    /// Address plus provider fields
    Structured(StructuredQuery),
}

impl Query {
    /// Classify the query for capability gating.
    ///
    /// Only the plain string form can be an IP address; structured queries
    /// always count as addresses. Coordinate queries have no geocode kind.
    pub fn kind(&self) -> Option<QueryKind> {
        match self {
            Query::Address(text) => {
                let text = text.trim();
                if text.parse::<Ipv4Addr>().is_ok() {
                    Some(QueryKind::Ipv4)
                } else if text.parse::<Ipv6Addr>().is_ok() {
                    Some(QueryKind::Ipv6)
                } else {
                    Some(QueryKind::Address)
                }
            }
            Query::Structured(_) => Some(QueryKind::Address),
            Query::Coordinates(_) => None,
        }
    }

    /// Free-text form sent to providers
    pub fn text(&self) -> String {
        match self {
            Query::Address(text) => text.clone(),
            Query::Structured(structured) => structured.address.clone(),
            Query::Coordinates(coords) => format!("{},{}", coords.lat, coords.lon),
        }
    }

    /// Country filter, if the query carries one
    pub fn country(&self) -> Option<&str> {
        match self {
            Query::Structured(structured) => structured.country.as_deref(),
            _ => None,
        }
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query::Address(value.to_string())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query::Address(value)
    }
}

impl From<Coordinates> for Query {
    fn from(value: Coordinates) -> Self {
        Query::Coordinates(value)
    }
}

impl From<StructuredQuery> for Query {
    fn from(value: StructuredQuery) -> Self {
        Query::Structured(value)
    }
}

/// Normalized geocoding record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub formatted_address: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub zipcode: Option<String>,
    pub street_name: Option<String>,
    pub street_number: Option<String>,

    /// Provider-specific fields that have no normalized slot
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,

    /// Name of the provider that produced the record
    pub provider: String,
}

impl ResultItem {
    /// Create an empty record attributed to a provider
    pub fn for_provider(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    /// Coordinates, when both halves are present
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }
}

/// Ordered results of a single geocode or reverse call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub items: Vec<ResultItem>,

    /// Raw provider payload, kept for callers that need unmapped fields
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl ResultSet {
    pub fn new(items: Vec<ResultItem>, raw: Value) -> Self {
        Self { items, raw }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One slot of a batch outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub error: Option<String>,
    pub data: Vec<ResultItem>,
}

impl BatchEntry {
    pub fn success(data: Vec<ResultItem>) -> Self {
        Self { error: None, data }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            data: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Batch result: exactly one entry per input query, in input order
pub type BatchOutcome = Vec<BatchEntry>;

/// Handle for a job created on a provider's batch service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl RemoteJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_kind_classification() {
        assert_eq!(Query::from("8.8.8.8").kind(), Some(QueryKind::Ipv4));
        assert_eq!(Query::from("2001:db8::1").kind(), Some(QueryKind::Ipv6));
        assert_eq!(Query::from("29 champs elysée paris").kind(), Some(QueryKind::Address));
        assert_eq!(Query::from(Coordinates::new(1.0, 2.0)).kind(), None);
    }

    #[test]
    fn test_structured_query_is_always_address() {
        let query = Query::from(StructuredQuery {
            address: "8.8.8.8".to_string(),
            country: Some("US".to_string()),
            extra: HashMap::new(),
        });
        assert_eq!(query.kind(), Some(QueryKind::Address));
        assert_eq!(query.country(), Some("US"));
    }

    #[test]
    fn test_query_deserializes_untagged() {
        let address: Query = serde_json::from_str("\"Paris\"").unwrap();
        assert_eq!(address, Query::from("Paris"));

        let coords: Query = serde_json::from_str(r#"{"lat": 48.85, "lon": 2.35}"#).unwrap();
        assert_eq!(coords, Query::from(Coordinates::new(48.85, 2.35)));

        let structured: Query =
            serde_json::from_str(r#"{"address": "Berlin", "country": "DE"}"#).unwrap();
        assert_eq!(structured.country(), Some("DE"));
    }

    #[test]
    fn test_batch_entry_constructors() {
        let ok = BatchEntry::success(vec![ResultItem::for_provider("here")]);
        assert!(!ok.is_error());
        assert_eq!(ok.data.len(), 1);

        let failed = BatchEntry::failure("statusCode: 400");
        assert!(failed.is_error());
        assert!(failed.data.is_empty());
    }
}
