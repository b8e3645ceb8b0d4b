use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const MAPBOX_GEOCODING_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places/";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid geocoding URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("No address found")]
    NoMatch,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Reverse-geocode a point into a human-readable address.
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError>;
}

pub struct MapboxGeocoder {
    client: Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    place_name: Option<String>,
}

impl MapboxGeocoder {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            base_url: MAPBOX_GEOCODING_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_url(&self, latitude: f64, longitude: f64) -> Result<Url, GeocodeError> {
        // Mapbox takes the point as longitude,latitude
        let mut url = Url::parse(&self.base_url)?.join(&format!("{},{}.json", longitude, latitude))?;
        url.query_pairs_mut()
            .append_pair("access_token", &self.token)
            .append_pair("types", "address");
        Ok(url)
    }
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError> {
        let url = self.request_url(latitude, longitude)?;
        let collection: FeatureCollection = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        collection
            .features
            .into_iter()
            .find_map(|f| f.place_name.filter(|name| !name.is_empty()))
            .ok_or(GeocodeError::NoMatch)
    }
}

pub fn format_coordinates(latitude: f64, longitude: f64) -> String {
    format!("{}, {}", latitude, longitude)
}

/// Address for a point, falling back to the raw coordinates when there is no
/// geocoder or the lookup fails.
pub async fn resolve_address(
    geocoder: Option<&dyn Geocoder>,
    latitude: f64,
    longitude: f64,
) -> String {
    let Some(geocoder) = geocoder else {
        return format_coordinates(latitude, longitude);
    };
    match geocoder.reverse(latitude, longitude).await {
        Ok(address) => address,
        Err(e) => {
            tracing::warn!("Reverse geocoding failed: {}", e);
            format_coordinates(latitude, longitude)
        }
    }
}
