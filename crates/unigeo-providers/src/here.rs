//! HERE geocoding with the job-poll batch service

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use unigeo_core::adapter::{BatchGeocode, ReverseGeocode};
use unigeo_core::batch::{JobPollBatchEngine, JobPollEndpoints};
use unigeo_core::http::{params, Params, Transport};
use unigeo_core::{
    BatchConfig, Capabilities, Coordinates, Error, Provider, ProviderConfig, Query, Result,
    ResultItem, ResultSet,
};

use crate::address_search::{number_field, rebase, text_field, AddressSearch};

pub const NAME: &str = "here";

pub const GEOCODE_URL: &str = "https://geocode.search.hereapi.com/v1/geocode";
pub const REVERSE_URL: &str = "https://revgeocode.search.hereapi.com/v1/revgeocode";

/// Endpoint overrides, mostly for tests and proxies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HereEndpoints {
    pub geocode_url: String,
    pub reverse_url: String,
    pub jobs: JobPollEndpoints,
}

impl Default for HereEndpoints {
    fn default() -> Self {
        Self {
            geocode_url: GEOCODE_URL.to_string(),
            reverse_url: REVERSE_URL.to_string(),
            jobs: JobPollEndpoints::default(),
        }
    }
}

impl HereEndpoints {
    /// Every default endpoint moved under `origin`
    pub fn under(origin: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            geocode_url: rebase(origin, &defaults.geocode_url)?,
            reverse_url: rebase(origin, &defaults.reverse_url)?,
            jobs: JobPollEndpoints {
                jobs_url: rebase(origin, &defaults.jobs.jobs_url)?,
            },
        })
    }
}

#[derive(Debug)]
pub struct HereProvider {
    search: AddressSearch,
    batch: JobPollBatchEngine,
}

impl HereProvider {
    pub fn new(
        api_key: impl Into<String>,
        transport: Arc<dyn Transport>,
        endpoints: HereEndpoints,
        batch: BatchConfig,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("here provider needs an api_key"));
        }
        let auth: Params = params([("apiKey", api_key.as_str())]);

        let search = AddressSearch::new(
            NAME,
            transport.clone(),
            endpoints.geocode_url,
            endpoints.reverse_url,
            auth.clone(),
        );
        Ok(Self {
            batch: JobPollBatchEngine::new(NAME, transport, endpoints.jobs, auth, batch),
            search,
        })
    }

    /// Build from a provider section of the configuration file
    pub fn from_config(
        config: &ProviderConfig,
        batch: BatchConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let endpoints = match &config.base_url {
            Some(origin) => HereEndpoints::under(origin)?,
            None => HereEndpoints::default(),
        };
        Self::new(config.require_api_key(NAME)?, transport, endpoints, batch)
    }

    /// Stop batch polling once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.batch = self.batch.with_cancellation(token);
        self
    }
}

#[async_trait]
impl Provider for HereProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ADDRESS_ONLY
    }

    async fn geocode(&self, query: &Query) -> Result<ResultSet> {
        let mut request = params([("q", query.text())]);
        if let Query::Structured(structured) = query {
            if let Some(country) = &structured.country {
                request.push(("in".to_string(), format!("countryCode:{}", country)));
            }
            request.extend(structured.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let body = self.search.fetch(self.search.forward_url(), request).await?;
        Ok(ResultSet::new(format_items(&body), body))
    }

    fn reverse(&self) -> Option<&dyn ReverseGeocode> {
        Some(self)
    }

    fn batch(&self) -> Option<&dyn BatchGeocode> {
        Some(&self.batch)
    }
}

#[async_trait]
impl ReverseGeocode for HereProvider {
    async fn reverse(&self, at: Coordinates) -> Result<ResultSet> {
        let request = params([("at", format!("{},{}", at.lat, at.lon))]);
        let body = self.search.fetch(self.search.reverse_url(), request).await?;
        Ok(ResultSet::new(format_items(&body), body))
    }
}

/// Map a `{items: [...]}` search response
pub fn format_items(body: &Value) -> Vec<ResultItem> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(format_item).collect())
        .unwrap_or_default()
}

fn format_item(item: &Value) -> ResultItem {
    let empty = Value::Null;
    let position = item.get("position").unwrap_or(&empty);
    let address = item.get("address").unwrap_or(&empty);

    let mut result = ResultItem::for_provider(NAME);
    result.latitude = number_field(position, "lat");
    result.longitude = number_field(position, "lng");
    result.formatted_address = text_field(address, "label");
    result.country = text_field(address, "countryName");
    result.country_code = text_field(address, "countryCode");
    result.state = text_field(address, "state");
    result.county = text_field(address, "county");
    result.city = text_field(address, "city");
    result.district = text_field(address, "district");
    result.zipcode = text_field(address, "postalCode");
    result.street_name = text_field(address, "street");
    result.street_number = text_field(address, "houseNumber");

    for key in ["id", "resultType"] {
        if let Some(value) = item.get(key) {
            result.extra.insert(key.to_string(), value.clone());
        }
    }
    result
}
