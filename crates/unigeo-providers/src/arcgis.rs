//! ArcGIS World Geocoding Service with client-credentials tokens
//!
//! No native batch endpoint is used, so batches go through the concurrent
//! fallback. Every request carries a bearer token from the shared
//! [`ClientCredentials`] cache when credentials are configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use unigeo_core::adapter::ReverseGeocode;
use unigeo_core::http::{params, Params, Transport};
use unigeo_core::{
    Capabilities, ClientCredentials, Coordinates, Error, Provider, ProviderConfig, Query, Result,
    ResultItem, ResultSet,
};

use crate::address_search::{number_field, rebase, text_field, AddressSearch};

pub const NAME: &str = "arcgis";

pub const GEOCODE_URL: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates";
pub const REVERSE_URL: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/reverseGeocode";
pub const TOKEN_URL: &str = "https://www.arcgis.com/sharing/oauth2/token";

/// Endpoint overrides, mostly for tests and proxies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcGisEndpoints {
    pub geocode_url: String,
    pub reverse_url: String,
    pub token_url: String,
}

impl Default for ArcGisEndpoints {
    fn default() -> Self {
        Self {
            geocode_url: GEOCODE_URL.to_string(),
            reverse_url: REVERSE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

impl ArcGisEndpoints {
    /// Every default endpoint moved under `origin`
    pub fn under(origin: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            geocode_url: rebase(origin, &defaults.geocode_url)?,
            reverse_url: rebase(origin, &defaults.reverse_url)?,
            token_url: rebase(origin, &defaults.token_url)?,
        })
    }
}

#[derive(Debug)]
pub struct ArcGisProvider {
    search: AddressSearch,
    credentials: Option<ClientCredentials>,
}

impl ArcGisProvider {
    /// Anonymous access
    pub fn new(transport: Arc<dyn Transport>, endpoints: ArcGisEndpoints) -> Self {
        Self {
            search: AddressSearch::new(
                NAME,
                transport,
                endpoints.geocode_url,
                endpoints.reverse_url,
                params([("f", "json")]),
            ),
            credentials: None,
        }
    }

    /// Authenticated access through the client-credentials grant
    pub fn with_client_credentials(
        transport: Arc<dyn Transport>,
        endpoints: ArcGisEndpoints,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let credentials =
            ClientCredentials::new(client_id, client_secret, endpoints.token_url.clone())?;
        let mut provider = Self::new(transport, endpoints);
        provider.credentials = Some(credentials);
        Ok(provider)
    }

    /// Build from a provider section of the configuration file
    pub fn from_config(config: &ProviderConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let endpoints = match &config.base_url {
            Some(origin) => ArcGisEndpoints::under(origin)?,
            None => ArcGisEndpoints::default(),
        };
        match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => {
                Self::with_client_credentials(transport, endpoints, id.clone(), secret.clone())
            }
            (None, None) => Ok(Self::new(transport, endpoints)),
            _ => Err(Error::config(
                "arcgis provider needs both client_id and client_secret, or neither",
            )),
        }
    }

    async fn authorized(&self, mut request: Params) -> Result<Params> {
        if let Some(credentials) = &self.credentials {
            let token = credentials.token(self.search.transport().as_ref()).await?;
            request.push(("token".to_string(), token));
        }
        Ok(request)
    }

    async fn fetch(&self, url: &str, request: Params) -> Result<Value> {
        let request = self.authorized(request).await?;
        let body = self.search.fetch(url, request).await?;

        // Application errors arrive with HTTP 200.
        if let Some(error) = body.get("error") {
            return Err(Error::Provider {
                provider: NAME.to_string(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Provider for ArcGisProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ADDRESS_ONLY
    }

    async fn geocode(&self, query: &Query) -> Result<ResultSet> {
        let mut request = params([("SingleLine", query.text()), ("outFields", "*".to_string())]);
        if let Some(country) = query.country() {
            request.push(("countryCode".to_string(), country.to_string()));
        }

        let body = self.fetch(self.search.forward_url(), request).await?;
        let items = body
            .get("candidates")
            .and_then(Value::as_array)
            .map(|candidates| candidates.iter().map(format_candidate).collect())
            .unwrap_or_default();
        Ok(ResultSet::new(items, body))
    }

    fn reverse(&self) -> Option<&dyn ReverseGeocode> {
        Some(self)
    }
}

#[async_trait]
impl ReverseGeocode for ArcGisProvider {
    async fn reverse(&self, at: Coordinates) -> Result<ResultSet> {
        // ArcGIS takes x,y order.
        let request = params([("location", format!("{},{}", at.lon, at.lat))]);
        let body = self.fetch(self.search.reverse_url(), request).await?;

        let items = match body.get("address") {
            Some(address) => vec![format_reverse(address, body.get("location"))],
            None => Vec::new(),
        };
        Ok(ResultSet::new(items, body))
    }
}

fn format_candidate(candidate: &Value) -> ResultItem {
    let empty = Value::Null;
    let attributes = candidate.get("attributes").unwrap_or(&empty);
    let location = candidate.get("location").unwrap_or(&empty);

    let mut item = ResultItem::for_provider(NAME);
    item.latitude = number_field(location, "y");
    item.longitude = number_field(location, "x");
    item.formatted_address = text_field(candidate, "address");
    item.country = text_field(attributes, "CntryName");
    item.country_code = text_field(attributes, "Country");
    item.state = text_field(attributes, "Region");
    item.county = text_field(attributes, "Subregion");
    item.city = text_field(attributes, "City");
    item.district = text_field(attributes, "Nbrhd");
    item.zipcode = text_field(attributes, "Postal");
    item.street_name = text_field(attributes, "StName");
    item.street_number = text_field(attributes, "AddNum");

    if let Some(score) = candidate.get("score") {
        item.extra.insert("score".to_string(), score.clone());
    }
    item
}

fn format_reverse(address: &Value, location: Option<&Value>) -> ResultItem {
    let mut item = ResultItem::for_provider(NAME);
    if let Some(location) = location {
        item.latitude = number_field(location, "y");
        item.longitude = number_field(location, "x");
    }
    item.formatted_address = text_field(address, "Match_addr");
    item.country_code = text_field(address, "CountryCode");
    item.state = text_field(address, "Region");
    item.county = text_field(address, "Subregion");
    item.city = text_field(address, "City");
    item.district = text_field(address, "Neighborhood");
    item.zipcode = text_field(address, "Postal");
    item.street_name = text_field(address, "Address");
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unigeo_core::http::Method;
    use unigeo_core::{ScriptedTransport, TransportResponse};

    fn candidates() -> TransportResponse {
        TransportResponse::json_body(
            200,
            &json!({"candidates": [{
                "address": "380 New York St, Redlands, California, 92373",
                "location": {"x": -117.19487, "y": 34.05723},
                "score": 100,
                "attributes": {
                    "AddNum": "380",
                    "StName": "New York",
                    "City": "Redlands",
                    "Subregion": "San Bernardino County",
                    "Region": "California",
                    "Postal": "92373",
                    "Country": "USA",
                    "CntryName": "United States"
                }
            }]}),
        )
    }

    #[tokio::test]
    async fn test_anonymous_geocode() {
        let transport = ScriptedTransport::new();
        transport.on_get("/findAddressCandidates", candidates());
        let provider = ArcGisProvider::new(Arc::new(transport.clone()), ArcGisEndpoints::default());

        let results = provider.geocode(&Query::from("380 New York St")).await.unwrap();

        let item = &results.items[0];
        assert_eq!(item.coordinates(), Some(Coordinates::new(34.05723, -117.19487)));
        assert_eq!(item.street_number.as_deref(), Some("380"));
        assert_eq!(item.country_code.as_deref(), Some("USA"));
        let request = &transport.requests()[0];
        assert_eq!(request.param("f"), Some("json"));
        assert_eq!(request.param("token"), None);
    }

    #[tokio::test]
    async fn test_token_fetched_once_and_reused() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/oauth2/token",
            TransportResponse::json_body(200, &json!({"access_token": "T1", "expires_in": 7200})),
        );
        transport.on_get("/findAddressCandidates", candidates());
        let provider = ArcGisProvider::with_client_credentials(
            Arc::new(transport.clone()),
            ArcGisEndpoints::default(),
            "id",
            "secret",
        )
        .unwrap();

        provider.geocode(&Query::from("a")).await.unwrap();
        provider.geocode(&Query::from("b")).await.unwrap();

        assert_eq!(transport.count(Method::POST, "/oauth2/token"), 1);
        let geocodes: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == Method::GET)
            .collect();
        assert_eq!(geocodes.len(), 2);
        assert!(geocodes.iter().all(|r| r.param("token") == Some("T1")));
    }

    #[tokio::test]
    async fn test_application_error_with_ok_status() {
        let transport = ScriptedTransport::new();
        transport.on_get(
            "/findAddressCandidates",
            TransportResponse::json_body(
                200,
                &json!({"error": {"code": 498, "message": "Invalid token."}}),
            ),
        );
        let provider = ArcGisProvider::new(Arc::new(transport), ArcGisEndpoints::default());

        let err = provider.geocode(&Query::from("a")).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err.to_string().contains("Invalid token."));
    }

    #[tokio::test]
    async fn test_reverse_sends_x_y() {
        let transport = ScriptedTransport::new();
        transport.on_get(
            "/reverseGeocode",
            TransportResponse::json_body(
                200,
                &json!({
                    "address": {"Match_addr": "Redlands", "City": "Redlands", "CountryCode": "USA"},
                    "location": {"x": -117.19, "y": 34.05}
                }),
            ),
        );
        let provider = ArcGisProvider::new(Arc::new(transport.clone()), ArcGisEndpoints::default());

        let results = ReverseGeocode::reverse(&provider, Coordinates::new(34.05, -117.19))
            .await
            .unwrap();

        assert_eq!(results.items[0].city.as_deref(), Some("Redlands"));
        assert_eq!(transport.requests()[0].param("location"), Some("-117.19,34.05"));
    }

    #[tokio::test]
    async fn test_base_url_moves_token_and_search_endpoints() {
        let transport = ScriptedTransport::new();
        transport.on_post(
            "/oauth2/token",
            TransportResponse::json_body(200, &json!({"access_token": "T1", "expires_in": 7200})),
        );
        transport.on_get("/findAddressCandidates", candidates());
        let config = ProviderConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            base_url: Some("http://localhost:9000".to_string()),
            ..Default::default()
        };
        let provider = ArcGisProvider::from_config(&config, Arc::new(transport.clone())).unwrap();

        provider.geocode(&Query::from("a")).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].url, "http://localhost:9000/sharing/oauth2/token");
        assert!(requests[1]
            .url
            .starts_with("http://localhost:9000/arcgis/rest/services/World/GeocodeServer/"));
    }

    #[test]
    fn test_half_configured_credentials_rejected() {
        let config = ProviderConfig {
            client_id: Some("id".to_string()),
            ..Default::default()
        };
        let transport = ScriptedTransport::new();
        assert!(ArcGisProvider::from_config(&config, Arc::new(transport)).is_err());
    }
}
