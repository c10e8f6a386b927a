use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::trace;

use crate::address::{AddressField, AddressKey, KeyVariant};
use crate::cache::Coordinate;
use crate::config::{AppConfig, GeocoderBackend};
use crate::errors::{AppError, AppResult, ResolutionError};
use crate::resolver::Geocoder;

/// Builds the geocoder selected by configuration.
pub fn geocoder_from_config(config: &AppConfig) -> AppResult<Arc<dyn Geocoder>> {
    match config.geocoder_backend {
        GeocoderBackend::Nominatim => Ok(Arc::new(NominatimClient::new(
            &config.geocoder_endpoint,
            &config.geocoder_user_agent,
            config.request_timeout(),
        )?)),
        GeocoderBackend::Google => {
            let api_key = config.google_geocoding_api_key.clone().ok_or_else(|| {
                AppError::Config("GOOGLE_GEOCODING_API_KEY is required for the google backend".into())
            })?;
            Ok(Arc::new(GoogleGeocodingClient::new(
                &config.geocoder_endpoint,
                api_key,
                config.request_timeout(),
            )?))
        }
    }
}

pub struct NominatimClient {
    http: Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(endpoint: &str, user_agent: &str, request_timeout: Duration) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn query_params(key: &AddressKey) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("format", "jsonv2".to_string()),
            ("limit", "1".to_string()),
        ];
        match key.variant() {
            KeyVariant::Precise => {
                let structured = [
                    ("street", AddressField::Street),
                    ("city", AddressField::City),
                    ("state", AddressField::Region),
                    ("postalcode", AddressField::PostalCode),
                    ("country", AddressField::Country),
                ];
                for (name, field) in structured {
                    if let Some(value) = key.component(field) {
                        params.push((name, value.to_string()));
                    }
                }
            }
            KeyVariant::Degraded => params.push(("q", key.query().to_string())),
        }
        params
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn geocode(&self, key: &AddressKey) -> Result<Coordinate, ResolutionError> {
        #[derive(Deserialize)]
        struct SearchHit {
            lat: String,
            lon: String,
        }

        let response = self
            .http
            .get(format!("{}/search", self.endpoint))
            .query(&Self::query_params(key))
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response.status())?;

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|err| ResolutionError::Malformed(format!("undecodable nominatim body: {err}")))?;
        let hit = hits.into_iter().next().ok_or(ResolutionError::NoMatch)?;
        let lat = hit.lat.trim().parse::<f64>();
        let lon = hit.lon.trim().parse::<f64>();
        trace!(key = %key, lat = %hit.lat, lon = %hit.lon, "nominatim hit");
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => checked_coordinate(lat, lon),
            _ => Err(ResolutionError::Malformed(format!(
                "non-numeric coordinates {:?}/{:?}",
                hit.lat, hit.lon
            ))),
        }
    }
}

pub struct GoogleGeocodingClient {
    http: Client,
    endpoint: String,
    api_key: SecretString,
}

impl GoogleGeocodingClient {
    pub fn new(endpoint: &str, api_key: SecretString, request_timeout: Duration) -> AppResult<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Geocoder for GoogleGeocodingClient {
    async fn geocode(&self, key: &AddressKey) -> Result<Coordinate, ResolutionError> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            results: Vec<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            geometry: ResponseGeometry,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            location: ResponseLocation,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            lat: f64,
            lng: f64,
        }

        let response = self
            .http
            .get(format!("{}/maps/api/geocode/json", self.endpoint))
            .query(&[
                ("address", key.query()),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(response.status())?;

        let parsed: Response = response
            .json()
            .await
            .map_err(|err| ResolutionError::Malformed(format!("undecodable google body: {err}")))?;
        let detail = parsed.error_message.unwrap_or_default();
        match parsed.status.as_str() {
            "OK" => {
                let result = parsed
                    .results
                    .into_iter()
                    .next()
                    .ok_or(ResolutionError::NoMatch)?;
                let location = result.geometry.location;
                checked_coordinate(location.lat, location.lng)
            }
            "ZERO_RESULTS" => Err(ResolutionError::NoMatch),
            "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR" => Err(ResolutionError::Unavailable(format!(
                "{}: {detail}",
                parsed.status
            ))),
            other => Err(ResolutionError::Malformed(format!("{other}: {detail}"))),
        }
    }
}

fn classify_transport(err: reqwest::Error) -> ResolutionError {
    if err.is_timeout() {
        ResolutionError::Timeout
    } else if err.is_connect() || err.is_request() {
        ResolutionError::Unavailable(err.to_string())
    } else {
        ResolutionError::Malformed(err.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), ResolutionError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(ResolutionError::Unavailable(status.to_string()))
    } else {
        Err(ResolutionError::Malformed(format!("unexpected status {status}")))
    }
}

fn checked_coordinate(lat: f64, lon: f64) -> Result<Coordinate, ResolutionError> {
    Coordinate::new(lat, lon)
        .ok_or_else(|| ResolutionError::Malformed(format!("coordinate out of range: {lat}, {lon}")))
}
