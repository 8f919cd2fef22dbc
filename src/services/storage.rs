use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Byte-blob store holding uploaded frames too large to inline in a job.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        match response.status_code() {
            200..=299 => Ok(response.to_vec()),
            404 => Err(StorageError::NotFound(key.to_string())),
            code => Err(StorageError::Status {
                key: key.to_string(),
                code,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await?;
        match response.status_code() {
            // S3 answers 204 for deletes, including keys that never existed.
            200..=299 | 404 => Ok(()),
            code => Err(StorageError::Status {
                key: key.to_string(),
                code,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object storage returned HTTP {code} for {key}")]
    Status { key: String, code: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
