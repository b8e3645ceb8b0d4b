use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::SqliteIdentity;
use crate::config::Config;
use crate::contact::{mailer_from_config, Mailer};
use crate::geocode::{Geocoder, MapboxGeocoder};
use crate::issues::SqliteIssueGateway;
use crate::uploads::{LocalObjectStore, ObjectStore};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub identity: Arc<SqliteIdentity>,
    pub issues: Arc<SqliteIssueGateway>,
    pub store: Arc<dyn ObjectStore>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub mailer: Option<Arc<dyn Mailer>>,
}

impl AppState {
    /// Wire every service from configuration. Optional integrations stay
    /// None when their settings are missing.
    pub fn from_config(db: DbPool, config: Config) -> Self {
        let client = reqwest::Client::new();

        let geocoder: Option<Arc<dyn Geocoder>> = match config.geocoding.mapbox_token.as_deref() {
            Some(token) if !token.is_empty() => {
                Some(Arc::new(MapboxGeocoder::new(client.clone(), token)))
            }
            _ => None,
        };
        let mailer = mailer_from_config(&config.mail, client);
        let store = LocalObjectStore::new(
            config.uploads_path(),
            config.storage.public_base_url.clone(),
            config.storage.max_upload_bytes,
        );

        Self {
            identity: Arc::new(SqliteIdentity::new(db.clone(), config.auth.session_hours)),
            issues: Arc::new(SqliteIssueGateway::new(db.clone())),
            store: Arc::new(store),
            geocoder,
            mailer,
            db,
            config,
        }
    }
}
