use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::store::PgStore;
use crate::services::{
    categorize::CategoryResolver,
    encryption::{EncryptionError, FrameCipher},
    extraction::Extractor,
    places::{GooglePlacesClient, PlaceSearch, PlaceSearchError},
    storage::{R2Client, StorageError},
    vision::{VisionError, WorkersAiClient},
    worker::Worker,
};

/// Shared state passed to route handlers and the worker loop.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: PgStore,
    pub worker: Arc<Worker>,
}

impl AppState {
    /// Wire the worker and its collaborators from configuration.
    pub fn build(db: PgPool, config: &AppConfig) -> Result<Self, StartupError> {
        let store = PgStore::new(db.clone());

        tracing::info!("Initializing R2 storage client");
        let blobs = R2Client::new(
            &config.r2_bucket,
            &config.r2_endpoint,
            &config.r2_access_key,
            &config.r2_secret_key,
        )?;

        tracing::info!("Initializing AES-256-GCM frame cipher");
        let cipher = FrameCipher::new(&config.encryption_key)?;

        tracing::info!(model = %config.vision_model, "Initializing Cloudflare Workers AI client");
        let vision = WorkersAiClient::new(&config.cf_account_id, &config.cf_api_token, &config.vision_model)?;

        let places: Option<Arc<dyn PlaceSearch>> = match &config.places_api_key {
            Some(key) if !key.is_empty() => Some(Arc::new(GooglePlacesClient::new(key)?)),
            _ => {
                tracing::warn!("PLACES_API_KEY not set; external merchant lookup disabled");
                None
            }
        };

        let store_arc = Arc::new(store.clone());
        let worker = Worker::new(
            store_arc.clone(),
            store_arc.clone(),
            CategoryResolver::new(store_arc, places),
            Extractor::new(Arc::new(vision), config.extraction_batch_size, config.retry_policy()),
            Arc::new(blobs),
            Arc::new(cipher),
            config.worker_settings(),
        );

        Ok(Self {
            db,
            store,
            worker: Arc::new(worker),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Encryption: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Vision client: {0}")]
    Vision(#[from] VisionError),

    #[error("Place search client: {0}")]
    Places(#[from] PlaceSearchError),
}
