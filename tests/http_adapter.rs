//! HTTP backend against a local axum server.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{body::Bytes, Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use checkin_store::{
    BlobLocator, CheckinStore, CheckinSubmission, HttpAdapter, HttpBackendConfig, InsertRequest,
    LocationReading, RemoteError, RemoteId, RemoteRecord, RemoteSyncAdapter, StoreConfig,
    SubmissionId, SyncOrchestrator, Timestamp, CONTENT_DIGEST_HEADER, CORRELATION_HEADER,
};

#[derive(Default)]
struct Backend {
    blobs: HashMap<String, Vec<u8>>,
    records: Vec<RemoteRecord>,
    correlations: Vec<String>,
}

#[derive(Clone)]
struct ServerState {
    backend: Arc<Mutex<Backend>>,
    api_key: Option<String>,
}

impl ServerState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        match &self.api_key {
            None => true,
            Some(key) => headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == format!("Bearer {key}")),
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    user_code: Option<String>,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn upload(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let digest = headers
        .get(CONTENT_DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    if digest != hex::encode(Sha256::digest(&body)) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let correlation = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut backend = state.backend.lock();
    let locator = format!("http://test/selfies/{}-{}", correlation, backend.blobs.len());
    backend.blobs.insert(locator.clone(), body.to_vec());
    backend.correlations.push(correlation);
    Ok(Json(json!({ "locator": locator })))
}

async fn insert(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<InsertRequest>,
) -> Result<Json<Value>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let mut backend = state.backend.lock();
    if !backend.blobs.contains_key(&request.image.0) {
        return Err(StatusCode::CONFLICT);
    }

    let id = RemoteId(format!("srv-{}", backend.records.len() + 1));
    backend.records.push(RemoteRecord {
        id: id.clone(),
        user_code: request.user_code,
        submission_id: request.submission_id,
        location: request.location,
        image: request.image,
        created_at: Timestamp::now(),
    });
    Ok(Json(json!({ "id": id })))
}

async fn list(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RemoteRecord>>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let backend = state.backend.lock();
    // Insertion order on purpose; the client sorts.
    let records = backend
        .records
        .iter()
        .filter(|r| query.user_code.as_ref().map_or(true, |u| &r.user_code == u))
        .cloned()
        .collect();
    Ok(Json(records))
}

async fn spawn_server(api_key: Option<&str>) -> (String, Arc<Mutex<Backend>>) {
    let backend = Arc::new(Mutex::new(Backend::default()));
    let state = ServerState {
        backend: Arc::clone(&backend),
        api_key: api_key.map(str::to_string),
    };
    let app = Router::new()
        .route("/health", get(health))
        .route("/blobs", post(upload))
        .route("/checkins", post(insert).get(list))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), backend)
}

fn adapter(base_url: &str, api_key: Option<&str>) -> HttpAdapter {
    HttpAdapter::new(HttpBackendConfig {
        base_url: base_url.to_string(),
        api_key: api_key.map(str::to_string),
        timeout_secs: 5,
    })
    .unwrap()
}

fn seeded(n: usize, user: &str, age: ChronoDuration) -> RemoteRecord {
    RemoteRecord {
        id: RemoteId(format!("seed-{n}")),
        user_code: user.into(),
        submission_id: SubmissionId::generate(),
        location: LocationReading::new(10.0, 20.0, 4.0),
        image: BlobLocator(format!("http://test/selfies/seed-{n}")),
        created_at: Timestamp::from_datetime(&(Utc::now() - age)),
    }
}

#[tokio::test]
async fn test_health_probe() {
    let (url, _) = spawn_server(None).await;
    assert!(adapter(&url, None).is_reachable().await);
}

#[tokio::test]
async fn test_upload_and_insert() {
    let (url, backend) = spawn_server(None).await;
    let remote = adapter(&url, None);

    let image = b"\xFF\xD8jpeg body\xFF\xD9".to_vec();
    let locator = remote.upload_blob(&image, "VER-ABC123").await.unwrap();
    let id = remote
        .insert_record(
            "FIELD_01",
            &"VER-ABC123".into(),
            &LocationReading::new(40.7128, -74.0060, 5.0),
            &locator,
        )
        .await
        .unwrap();
    assert_eq!(id, RemoteId("srv-1".into()));

    let backend = backend.lock();
    assert_eq!(backend.blobs.get(&locator.0).unwrap(), &image);
    assert_eq!(backend.correlations, vec!["VER-ABC123".to_string()]);
    assert_eq!(backend.records[0].location.latitude, 40.7128);
    assert_eq!(backend.records[0].image, locator);
}

#[tokio::test]
async fn test_insert_with_unknown_locator_is_status_error() {
    let (url, _) = spawn_server(None).await;
    let result = adapter(&url, None)
        .insert_record(
            "FIELD_01",
            &"VER-1".into(),
            &LocationReading::new(0.0, 0.0, 1.0),
            &BlobLocator("http://test/selfies/nope".into()),
        )
        .await;
    assert!(matches!(result, Err(RemoteError::Status { status: 409, .. })));
}

#[tokio::test]
async fn test_listing_is_newest_first() {
    let (url, backend) = spawn_server(None).await;
    {
        let mut backend = backend.lock();
        backend.records.push(seeded(0, "FIELD_01", ChronoDuration::days(2)));
        backend.records.push(seeded(1, "FIELD_02", ChronoDuration::minutes(1)));
        backend.records.push(seeded(2, "FIELD_01", ChronoDuration::hours(5)));
    }
    let remote = adapter(&url, None);

    let all: Vec<_> = remote
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(all, vec!["seed-1", "seed-2", "seed-0"]);

    let mine: Vec<_> = remote
        .list_by_user("FIELD_01")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(mine, vec!["seed-2", "seed-0"]);

    assert!(remote.list_by_user("NOBODY").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_compute_stats() {
    let (url, backend) = spawn_server(None).await;
    {
        let mut backend = backend.lock();
        backend.records.push(seeded(0, "FIELD_01", ChronoDuration::days(1)));
        backend.records.push(seeded(1, "FIELD_01", ChronoDuration::days(6)));
        backend.records.push(seeded(2, "FIELD_02", ChronoDuration::days(9)));
    }

    let stats = adapter(&url, None).compute_stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.unique_users, 2);
    assert_eq!(stats.last_7_days_count, 2);
    assert_eq!(stats.today_count, 0);
}

#[tokio::test]
async fn test_bearer_auth() {
    let (url, backend) = spawn_server(Some("s3cret")).await;

    let anonymous = adapter(&url, None);
    assert!(matches!(
        anonymous.upload_blob(b"x", "VER-1").await,
        Err(RemoteError::Status { status: 401, .. })
    ));
    assert!(matches!(
        anonymous.list_all().await,
        Err(RemoteError::Status { status: 401, .. })
    ));

    let authorized = adapter(&url, Some("s3cret"));
    authorized.upload_blob(b"x", "VER-1").await.unwrap();
    assert_eq!(backend.lock().blobs.len(), 1);
}

#[tokio::test]
async fn test_orchestrator_syncs_over_http() {
    let (url, backend) = spawn_server(Some("k")).await;
    let dir = TempDir::new().unwrap();
    let store =
        Arc::new(CheckinStore::create(StoreConfig::at(dir.path().join("store"))).unwrap());
    let remote: Arc<dyn RemoteSyncAdapter> = Arc::new(adapter(&url, Some("k")));
    let sync = SyncOrchestrator::new(Arc::clone(&store), Some(remote));

    let image = vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
    let report = sync
        .submit(CheckinSubmission {
            user_code: "FIELD_07".into(),
            location: LocationReading::new(-1.2921, 36.8219, 8.0),
            image: image.clone(),
            submission_id: "VER-NAIROB".into(),
        })
        .await
        .unwrap();

    assert!(report.sync.is_synced());
    assert_eq!(store.get_blob(&report.record.blob_id).unwrap(), image);

    let backend = backend.lock();
    assert_eq!(backend.records.len(), 1);
    assert_eq!(backend.records[0].user_code, "FIELD_07");
    assert_eq!(backend.records[0].submission_id, "VER-NAIROB".into());
    assert_eq!(backend.blobs.get(&backend.records[0].image.0).unwrap(), &image);
}

#[tokio::test]
async fn test_orchestrator_with_dead_server_stays_local() {
    let dir = TempDir::new().unwrap();
    let store =
        Arc::new(CheckinStore::create(StoreConfig::at(dir.path().join("store"))).unwrap());
    let remote: Arc<dyn RemoteSyncAdapter> = Arc::new(adapter("http://127.0.0.1:9", None));
    let sync = SyncOrchestrator::new(Arc::clone(&store), Some(remote));

    let report = sync
        .submit(CheckinSubmission {
            user_code: "FIELD_01".into(),
            location: LocationReading::new(0.0, 0.0, 1.0),
            image: vec![1, 2, 3],
            submission_id: SubmissionId::generate(),
        })
        .await
        .unwrap();

    assert!(!report.sync.is_synced());
    assert_eq!(store.len(), 1);
}
