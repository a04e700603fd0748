//! TomTom search with the redirect-chase batch service

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unigeo_core::adapter::{BatchGeocode, ReverseGeocode};
use unigeo_core::batch::{BatchItemCodec, RedirectChaseBatchEngine, RedirectChaseEndpoints};
use unigeo_core::http::{params, Params, Transport};
use unigeo_core::{
    BatchConfig, Capabilities, Coordinates, Error, Provider, ProviderConfig, Query, Result,
    ResultItem, ResultSet,
};
use url::form_urlencoded;

use crate::address_search::{
    encode_path_segment, number_field, rebase, text_field, AddressSearch,
};

pub const NAME: &str = "tomtom";

pub const GEOCODE_URL: &str = "https://api.tomtom.com/search/2/geocode";
pub const REVERSE_URL: &str = "https://api.tomtom.com/search/2/reverseGeocode";

/// Endpoint overrides, mostly for tests and proxies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TomTomEndpoints {
    pub geocode_url: String,
    pub reverse_url: String,
    pub batch: RedirectChaseEndpoints,
}

impl Default for TomTomEndpoints {
    fn default() -> Self {
        Self {
            geocode_url: GEOCODE_URL.to_string(),
            reverse_url: REVERSE_URL.to_string(),
            batch: RedirectChaseEndpoints::default(),
        }
    }
}

impl TomTomEndpoints {
    /// Every default endpoint moved under `origin`
    pub fn under(origin: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            geocode_url: rebase(origin, &defaults.geocode_url)?,
            reverse_url: rebase(origin, &defaults.reverse_url)?,
            batch: RedirectChaseEndpoints {
                batch_url: rebase(origin, &defaults.batch.batch_url)?,
                base_url: origin.trim_end_matches('/').to_string(),
            },
        })
    }
}

/// Batch item mapping: the same geocode request and response as single calls
#[derive(Debug, Default)]
pub struct TomTomCodec;

impl BatchItemCodec for TomTomCodec {
    fn item_query(&self, query: &Query) -> String {
        let options = query_options(query);
        let path = format!("/geocode/{}.json", encode_path_segment(&query.text()));
        if options.is_empty() {
            return path;
        }
        let query_string = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(options)
            .finish();
        format!("{}?{}", path, query_string)
    }

    fn parse_item(&self, response: &Value) -> Result<Vec<ResultItem>> {
        response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| results.iter().map(format_result).collect())
            .ok_or_else(|| Error::protocol("batch item response has no results"))
    }
}

fn query_options(query: &Query) -> Params {
    let mut options = Params::new();
    if let Query::Structured(structured) = query {
        if let Some(country) = &structured.country {
            options.push(("countrySet".to_string(), country.clone()));
        }
        options.extend(structured.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    options
}

#[derive(Debug)]
pub struct TomTomProvider {
    search: AddressSearch,
    batch: RedirectChaseBatchEngine,
}

impl TomTomProvider {
    pub fn new(
        api_key: impl Into<String>,
        transport: Arc<dyn Transport>,
        endpoints: TomTomEndpoints,
        batch: BatchConfig,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("tomtom provider needs an api_key"));
        }
        let auth: Params = params([("key", api_key.as_str())]);

        Ok(Self {
            batch: RedirectChaseBatchEngine::new(
                NAME,
                transport.clone(),
                Arc::new(TomTomCodec),
                endpoints.batch,
                auth.clone(),
                batch,
            ),
            search: AddressSearch::new(
                NAME,
                transport,
                endpoints.geocode_url,
                endpoints.reverse_url,
                auth,
            ),
        })
    }

    /// Build from a provider section of the configuration file
    pub fn from_config(
        config: &ProviderConfig,
        batch: BatchConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let endpoints = match &config.base_url {
            Some(origin) => TomTomEndpoints::under(origin)?,
            None => TomTomEndpoints::default(),
        };
        Self::new(config.require_api_key(NAME)?, transport, endpoints, batch)
    }

    /// Stop chasing batch redirects once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.batch = self.batch.with_cancellation(token);
        self
    }
}

#[async_trait]
impl Provider for TomTomProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ADDRESS_ONLY
    }

    async fn geocode(&self, query: &Query) -> Result<ResultSet> {
        let url = format!(
            "{}/{}.json",
            self.search.forward_url(),
            encode_path_segment(&query.text())
        );
        let body = self.search.fetch(&url, query_options(query)).await?;
        let items = TomTomCodec.parse_item(&body)?;
        Ok(ResultSet::new(items, body))
    }

    fn reverse(&self) -> Option<&dyn ReverseGeocode> {
        Some(self)
    }

    fn batch(&self) -> Option<&dyn BatchGeocode> {
        Some(&self.batch)
    }
}

#[async_trait]
impl ReverseGeocode for TomTomProvider {
    async fn reverse(&self, at: Coordinates) -> Result<ResultSet> {
        let url = format!("{}/{},{}.json", self.search.reverse_url(), at.lat, at.lon);
        let body = self.search.fetch(&url, Params::new()).await?;

        let items = body
            .get("addresses")
            .and_then(Value::as_array)
            .map(|addresses| addresses.iter().map(format_result).collect())
            .unwrap_or_default();
        Ok(ResultSet::new(items, body))
    }
}

/// Map one search result or reverse address entry
pub fn format_result(result: &Value) -> ResultItem {
    let empty = Value::Null;
    let address = result.get("address").unwrap_or(&empty);

    let mut item = ResultItem::for_provider(NAME);
    match result.get("position") {
        // Reverse responses carry "lat,lon" strings.
        Some(Value::String(position)) => {
            let mut parts = position.split(',').map(|p| p.trim().parse::<f64>().ok());
            item.latitude = parts.next().flatten();
            item.longitude = parts.next().flatten();
        }
        Some(position) => {
            item.latitude = number_field(position, "lat");
            item.longitude = number_field(position, "lon");
        }
        None => {}
    }

    item.formatted_address = text_field(address, "freeformAddress");
    item.country = text_field(address, "country");
    item.country_code = text_field(address, "countryCode");
    item.state = text_field(address, "countrySubdivision");
    item.county = text_field(address, "countrySecondarySubdivision");
    item.city = text_field(address, "municipality");
    item.district = text_field(address, "municipalitySubdivision");
    item.zipcode = text_field(address, "postalCode");
    item.street_name = text_field(address, "streetName");
    item.street_number = text_field(address, "streetNumber");

    if let Some(score) = result.get("score") {
        item.extra.insert("score".to_string(), score.clone());
    }
    item
}
