//! REST backend over `reqwest`.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Method | Path | Body | Response |
//! | --- | --- | --- | --- |
//! | GET | `/health` | | any 2xx |
//! | POST | `/blobs` | raw image bytes | `{"locator": "..."}` |
//! | POST | `/checkins` | [`InsertRequest`] JSON | `{"id": "..."}` |
//! | GET | `/checkins[?user_code=..]` | | `[RemoteRecord]` |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    newest_first, BlobLocator, RemoteError, RemoteId, RemoteRecord, RemoteSyncAdapter, Result,
};
use crate::config::HttpBackendConfig;
use crate::types::{LocationReading, SubmissionId};

/// Header carrying the submission a blob belongs to.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Header carrying the hex SHA-256 of an uploaded blob.
pub const CONTENT_DIGEST_HEADER: &str = "x-content-sha256";

/// Body of `POST /checkins`.
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertRequest {
    pub user_code: String,
    pub submission_id: SubmissionId,
    pub location: LocationReading,
    pub image: BlobLocator,
}

#[derive(Deserialize)]
struct UploadResponse {
    locator: BlobLocator,
}

#[derive(Deserialize)]
struct InsertResponse {
    id: RemoteId,
}

/// A [`RemoteSyncAdapter`] speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAdapter {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpAdapter {
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| RemoteError::InvalidConfig(format!("bad base url {base}: {e}")))?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidConfig(format!("bad endpoint {path}: {e}")))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.authorize(builder).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RemoteError::Unreachable(e.to_string())
            } else {
                RemoteError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn fetch_records(&self, url: Url) -> Result<Vec<RemoteRecord>> {
        let response = self.send(self.client.get(url)).await?;
        let mut records: Vec<RemoteRecord> = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        newest_first(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl RemoteSyncAdapter for HttpAdapter {
    fn name(&self) -> &str {
        "http"
    }

    async fn is_reachable(&self) -> bool {
        let url = match self.endpoint("health") {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.send(self.client.get(url)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    async fn upload_blob(&self, bytes: &[u8], correlation_id: &str) -> Result<BlobLocator> {
        let digest = hex::encode(Sha256::digest(bytes));
        let request = self
            .client
            .post(self.endpoint("blobs")?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(CORRELATION_HEADER, correlation_id)
            .header(CONTENT_DIGEST_HEADER, digest)
            .body(bytes.to_vec());

        let response = self.send(request).await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(body.locator)
    }

    async fn insert_record(
        &self,
        user_code: &str,
        submission_id: &SubmissionId,
        location: &LocationReading,
        image: &BlobLocator,
    ) -> Result<RemoteId> {
        let request = self
            .client
            .post(self.endpoint("checkins")?)
            .json(&InsertRequest {
                user_code: user_code.to_string(),
                submission_id: submission_id.clone(),
                location: *location,
                image: image.clone(),
            });

        let response = self.send(request).await?;
        let body: InsertResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        Ok(body.id)
    }

    async fn list_all(&self) -> Result<Vec<RemoteRecord>> {
        self.fetch_records(self.endpoint("checkins")?).await
    }

    async fn list_by_user(&self, user_code: &str) -> Result<Vec<RemoteRecord>> {
        let mut url = self.endpoint("checkins")?;
        url.query_pairs_mut().append_pair("user_code", user_code);
        let mut records = self.fetch_records(url).await?;
        // Servers that ignore the filter still satisfy the contract.
        records.retain(|r| r.user_code == user_code);
        Ok(records)
    }
}
