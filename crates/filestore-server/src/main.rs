//! Filestore Server
//!
//! HTTP front end for the file record store, with a background reaper for
//! abandoned drafts.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filestore::{FileRepository, FileStoreConfig, LocalStorage, MemoryFileRepository, Storage};
use filestore_core::config::AppConfig;
use filestore_db::{Database, DatabaseConfig, PgFileRepository};

mod error;
mod handlers;
mod state;

use state::{AppState, Files};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    init_tracing();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        warn!("Failed to load config from env: {}, using defaults", e);
        AppConfig::default()
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        storage = %config.storage.local_path,
        "Starting Filestore"
    );

    let (repo, db) = connect_repository(&config).await;

    let mut storage = LocalStorage::new(&config.storage.local_path);
    if let Some(base_url) = &config.storage.public_base_url {
        storage = storage.with_base_url(base_url.clone());
    }
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let files = Arc::new(Files::new(
        repo,
        storage,
        FileStoreConfig::from_files_config(&config.files)?,
    ));

    let reaper = spawn_cleanup(
        files.clone(),
        Duration::from_secs(config.files.cleanup_interval_seconds),
    );

    let app = build_router(AppState::new(files, config.clone()).with_database(db.clone()));

    // Start server
    let addr = config.server_addr();
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    if let Some(db) = db {
        db.close().await;
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,filestore=debug,filestore_server=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// PostgreSQL repository with its pool, or the in-memory one if the database
/// is unavailable
async fn connect_repository(config: &AppConfig) -> (Arc<dyn FileRepository>, Option<Database>) {
    let db_config = DatabaseConfig::from_app_config(&config.database);

    let db = match Database::connect(&db_config).await {
        Ok(db) => db,
        Err(e) => {
            warn!("Failed to connect to database: {}. Running on in-memory records.", e);
            return (Arc::new(MemoryFileRepository::new()), None);
        }
    };

    match filestore_db::schema::migrate(db.pool()).await {
        Ok(()) => {
            info!("Connected to database");
            (Arc::new(PgFileRepository::new(db.pool().clone())), Some(db))
        }
        Err(e) => {
            warn!("Failed to prepare schema: {}. Running on in-memory records.", e);
            db.close().await;
            (Arc::new(MemoryFileRepository::new()), None)
        }
    }
}

/// Reap expired drafts every `interval`
fn spawn_cleanup(files: Arc<Files>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match files.cleanup_expired_drafts().await {
                Ok(0) => debug!("No expired drafts"),
                Ok(count) => info!(count = count, "Reaped expired drafts"),
                Err(e) => warn!(error = %e, "Draft cleanup failed"),
            }
        }
    })
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.server.max_upload_size_bytes;

    let file_routes = Router::new()
        .route(
            "/",
            get(handlers::list_files)
                .post(handlers::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/:token",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/:token/download", get(handlers::download_file))
        .route("/:token/view", get(handlers::view_file))
        .route("/:token/thumbnail", post(handlers::create_thumbnail));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/files", file_routes)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, Response, StatusCode};
    use filestore::{FileRecord, FileStatus, MemoryStorage, StorageError, StorageResult};
    use tower::ServiceExt;

    const BOUNDARY: &str = "filestore-test-boundary";

    fn test_state() -> AppState {
        let repo: Arc<dyn FileRepository> = Arc::new(MemoryFileRepository::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let files = Arc::new(Files::new(repo, storage, FileStoreConfig::default()));
        AppState::new(files, AppConfig::default())
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn upload_request(filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/files")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn upload(app: &Router, filename: &str, data: &[u8]) -> FileRecord {
        let response = app
            .clone()
            .oneshot(upload_request(filename, data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json(response).await
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());

        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "disabled");
        assert_eq!(body["storage"], "up");
    }

    struct UnreachableStorage;

    #[async_trait::async_trait]
    impl Storage for UnreachableStorage {
        async fn put(&self, key: &str, _data: bytes::Bytes) -> StorageResult<()> {
            Err(StorageError::Backend(format!("cannot write {}", key)))
        }

        async fn get(&self, key: &str) -> StorageResult<bytes::Bytes> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::Backend("volume unmounted".to_string()))
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    #[tokio::test]
    async fn test_health_reports_storage_down() {
        let repo: Arc<dyn FileRepository> = Arc::new(MemoryFileRepository::new());
        let storage: Arc<dyn Storage> = Arc::new(UnreachableStorage);
        let files = Arc::new(Files::new(repo, storage, FileStoreConfig::default()));
        let app = build_router(AppState::new(files, AppConfig::default()));

        let response = app.oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "unavailable");
        assert_eq!(body["storage"], "down");
    }

    #[tokio::test]
    async fn test_upload_and_get() {
        let app = build_router(test_state());

        let record = upload(&app, "notes.txt", b"hello").await;
        assert_eq!(record.status, FileStatus::Draft);
        assert_eq!(record.meta.filename.as_deref(), Some("notes.txt"));
        assert_eq!(record.meta.size, 5);

        let response = app
            .oneshot(get_request(&format!("/api/files/{}", record.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: FileRecord = json(response).await;
        assert_eq!(fetched.id, record.id);
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let app = build_router(test_state());

        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/files")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let app = build_router(test_state());

        let response = app
            .oneshot(get_request("/api/files/token-doesnotexist"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_download_headers() {
        let app = build_router(test_state());
        let record = upload(&app, "final report.txt", b"content").await;

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/files/{}/download", record.token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-description"], "Download File");
        assert_eq!(headers["content-type"], "text/plain");
        assert_eq!(headers["cache-control"], "must-revalidate");
        assert_eq!(headers["expires"], "-1");
        assert_eq!(
            headers["content-disposition"],
            "attachment; filename=\"final report.txt\""
        );
        assert_eq!(headers["content-length"], "7");
        assert_eq!(headers["pragma"], "public");
        assert_eq!(headers["accept-ranges"], "bytes");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"content");

        let response = app
            .oneshot(get_request(&format!("/api/files/{}/view", record.token)))
            .await
            .unwrap();
        assert_eq!(response.headers()["content-description"], "View File");
        assert_eq!(
            response.headers()["content-disposition"],
            "inline; filename=\"final report.txt\""
        );
    }

    #[tokio::test]
    async fn test_discard_draft() {
        let state = test_state();
        let app = build_router(state.clone());
        let draft = upload(&app, "a.txt", b"a").await;
        let linked = upload(&app, "b.txt", b"b").await;
        state.files.link(&linked.token, 1).await.unwrap();

        let delete = |token: &str| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/files/{}", token))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(delete(&draft.token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(delete(&linked.token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.oneshot(delete(&draft.token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn thumbnail_request(token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/files/{}/thumbnail", token))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_thumbnail() {
        let app = build_router(test_state());
        let original = upload(&app, "wide.png", &png_bytes(400, 100)).await;

        let response = app
            .oneshot(thumbnail_request(
                &original.token,
                serde_json::json!({ "max_width": 150, "max_height": 150, "format": "jpeg" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let thumb: FileRecord = json(response).await;
        assert_eq!(thumb.source_file_id, original.id);
        assert_eq!(thumb.meta.mime_type.as_deref(), Some("image/jpeg"));
        let dims = thumb.meta.image.unwrap();
        assert_eq!((dims.width, dims.height), (150, 38));
    }

    #[tokio::test]
    async fn test_thumbnail_unprocessable() {
        let app = build_router(test_state());
        let text = upload(&app, "t.txt", b"not an image").await;
        let image = upload(&app, "i.png", &png_bytes(20, 20)).await;

        let response = app
            .clone()
            .oneshot(thumbnail_request(
                &text.token,
                serde_json::json!({ "max_width": 10, "max_height": 10 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["error"], "unsupported_format");

        let response = app
            .oneshot(thumbnail_request(
                &image.token,
                serde_json::json!({ "max_width": 10, "max_height": 10, "format": "bmp" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_list_files() {
        let app = build_router(test_state());
        for name in ["a.txt", "b.txt", "c.txt"] {
            upload(&app, name, name.as_bytes()).await;
        }

        let response = app
            .oneshot(get_request("/api/files?limit=2&offset=0"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["count"], 2);
        assert_eq!(body["elements"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_task_reaps_drafts() {
        let repo: Arc<dyn FileRepository> = Arc::new(MemoryFileRepository::new());
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let files = Arc::new(Files::new(
            repo,
            storage,
            FileStoreConfig {
                draft_grace: Duration::ZERO,
                ..Default::default()
            },
        ));
        let record = files
            .ingest_bytes(axum::body::Bytes::from_static(b"stale"), "stale.txt")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The first tick fires immediately
        let handle = spawn_cleanup(files.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(files.get_by_token(&record.token).await.is_err());
    }
}
