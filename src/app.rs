//! 路由组装：提交、管理端列表与下载、静态首页。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, AdminAuth};
use crate::files;
use crate::frontend;
use crate::http::add_security_headers;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::upload::{self, UploadConfig};

/// 每个请求共享的句柄。
#[derive(Clone)]
pub struct AppContext {
    pub storage: Arc<Storage>,
    pub registry: Arc<Registry>,
    pub upload: Arc<UploadConfig>,
    pub admin: Arc<AdminAuth>,
}

impl AppContext {
    pub fn new(storage: Storage, upload: UploadConfig, admin: AdminAuth) -> Self {
        let registry = Registry::new(storage.registry_path());
        Self {
            storage: Arc::new(storage),
            registry: Arc::new(registry),
            upload: Arc::new(upload),
            admin: Arc::new(admin),
        }
    }
}

pub fn build_router(ctx: AppContext) -> Router {
    let admin_routes = Router::new()
        .route("/api/admin/depots", get(files::list_depots))
        .route("/api/download/{filename}", get(files::download_file))
        .route_layer(middleware::from_fn(auth::admin_guard));

    Router::new()
        .route("/", get(frontend::serve_index))
        .route(
            "/api/upload",
            post(upload::submit_project).layer(DefaultBodyLimit::disable()),
        )
        .merge(admin_routes)
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(ctx.storage))
        .layer(Extension(ctx.registry))
        .layer(Extension(ctx.upload))
        .layer(Extension(ctx.admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};
    use bytes::Bytes;
    use serde_json::Value;
    use tempfile::{TempDir, tempdir};

    use std::time::{Duration, UNIX_EPOCH};

    use crate::config::{DEFAULT_MAX_UPLOAD_SIZE, MAX_TEXT_FIELD_LEN};
    use crate::registry::SubmissionRecord;

    const ADMIN_HEADER: &str = "Basic cHJvZjpzZWNyZXQ=";

    struct Harness {
        _temp: TempDir,
        storage: Arc<Storage>,
        registry: Arc<Registry>,
        server: TestServer,
    }

    async fn harness_with(max_file_size: u64, admin: AdminAuth) -> Harness {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::provision(temp.path().join("uploads"))
            .await
            .expect("provision");
        let ctx = AppContext::new(storage, UploadConfig { max_file_size }, admin);
        let storage = ctx.storage.clone();
        let registry = ctx.registry.clone();
        let server = TestServer::new(build_router(ctx)).expect("test server");
        Harness {
            _temp: temp,
            storage,
            registry,
            server,
        }
    }

    async fn harness() -> Harness {
        harness_with(DEFAULT_MAX_UPLOAD_SIZE, AdminAuth::from_parts(None, None)).await
    }

    fn zip_part(file_name: &str, data: &[u8]) -> Part {
        Part::bytes(Bytes::copy_from_slice(data))
            .file_name(file_name)
            .mime_type("application/zip")
    }

    fn full_form(name: &str, file_name: &str, data: &[u8]) -> MultipartForm {
        MultipartForm::new()
            .add_text("name", name)
            .add_text("email", "etudiant@example.org")
            .add_text("subject", "Systèmes")
            .add_text("clientTimestamp", "2024-02-01T10:00:00.000Z")
            .add_part("file", zip_part(file_name, data))
    }

    fn project_files(storage: &Storage) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(storage.projects_path())
            .expect("read projects dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn upload_stores_file_and_appends_record() {
        let h = harness().await;
        let data = b"PK\x03\x04 fake zip body";

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean Dupont", "tp1.zip", data))
            .await;

        assert_eq!(response.status_code(), 200);
        let body: Value = response.json();
        assert_eq!(body["success"], true);
        let record: SubmissionRecord =
            serde_json::from_value(body["data"].clone()).expect("record");
        assert!(record.stored_filename.contains("_Jean_Dupont_"));
        assert!(record.stored_filename.ends_with("_tp1.zip"));
        assert_eq!(record.file_size_bytes, data.len() as u64);
        assert_eq!(record.email, "etudiant@example.org");
        assert_eq!(
            record.client_timestamp,
            Some(Value::String("2024-02-01T10:00:00.000Z".into()))
        );

        let stored = std::fs::read(h.storage.projects_path().join(&record.stored_filename))
            .expect("stored file");
        assert_eq!(stored, data);
        assert_eq!(project_files(&h.storage), vec![record.stored_filename.clone()]);
        assert_eq!(h.registry.read_all().await.expect("read"), vec![record]);
    }

    #[tokio::test]
    async fn legacy_field_names_are_accepted() {
        let h = harness().await;
        let form = MultipartForm::new()
            .add_text("nom", "Ana Lima")
            .add_text("email", "ana@example.org")
            .add_text("matiere", "Réseaux")
            .add_text("timestamp", "1706781600000")
            .add_part("file", zip_part("projet.ZIP", b"zip"));

        let response = h.server.post("/api/upload").multipart(form).await;

        assert_eq!(response.status_code(), 200);
        let records = h.registry.read_all().await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "Réseaux");
        assert!(records[0].stored_filename.ends_with("_Ana_Lima_projet.ZIP"));
    }

    #[tokio::test]
    async fn non_zip_is_rejected_without_side_effects() {
        let h = harness().await;

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "report.txt", b"hello"))
            .await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(project_files(&h.storage).is_empty());
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_side_effects() {
        let h = harness_with(16, AdminAuth::from_parts(None, None)).await;

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "big.zip", &[7u8; 64]))
            .await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .contains("maximum size")
        );
        assert!(project_files(&h.storage).is_empty());
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn upload_exactly_at_limit_is_accepted() {
        let h = harness_with(16, AdminAuth::from_parts(None, None)).await;

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "fit.zip", &[1u8; 16]))
            .await;

        assert_eq!(response.status_code(), 200);
    }

    #[tokio::test]
    async fn missing_fields_or_file_are_rejected() {
        let h = harness().await;
        let fields = [
            ("name", "Jean"),
            ("email", "jean@example.org"),
            ("subject", "Maths"),
        ];

        for skipped in ["name", "email", "subject"] {
            let mut form = MultipartForm::new();
            for (key, value) in fields {
                if key != skipped {
                    form = form.add_text(key, value);
                }
            }
            form = form.add_part("file", zip_part("tp.zip", b"zip"));
            let response = h.server.post("/api/upload").multipart(form).await;
            assert_eq!(response.status_code(), 400, "missing {skipped}");
        }

        let blank = MultipartForm::new()
            .add_text("name", "   ")
            .add_text("email", "jean@example.org")
            .add_text("subject", "Maths")
            .add_part("file", zip_part("tp.zip", b"zip"));
        let response = h.server.post("/api/upload").multipart(blank).await;
        assert_eq!(response.status_code(), 400, "blank name");

        let no_file = MultipartForm::new()
            .add_text("name", "Jean")
            .add_text("email", "jean@example.org")
            .add_text("subject", "Maths");
        let response = h.server.post("/api/upload").multipart(no_file).await;
        assert_eq!(response.status_code(), 400, "missing file");

        assert!(project_files(&h.storage).is_empty());
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn non_multipart_body_is_bad_request() {
        let h = harness().await;

        let response = h.server.post("/api/upload").text("not a form").await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn long_name_and_file_name_are_capped() {
        let h = harness().await;
        let long_name = "a".repeat(300);
        let long_file = format!("{}.zip", "b".repeat(300));

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form(&long_name, &long_file, b"zip"))
            .await;

        assert_eq!(response.status_code(), 200);
        let records = h.registry.read_all().await.expect("read");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, long_name);
        let stored = &records[0].stored_filename;
        assert!(stored.len() <= 255, "{} bytes", stored.len());
        assert!(stored.ends_with(".zip"));
        assert_eq!(project_files(&h.storage), vec![stored.clone()]);

        let response = h.server.get(&format!("/api/download/{stored}")).await;
        assert_eq!(response.status_code(), 200);
    }

    #[tokio::test]
    async fn registry_failure_removes_published_archive() {
        let h = harness().await;
        std::fs::write(h.storage.registry_path(), b"{not json").expect("write");

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "tp.zip", b"zip"))
            .await;

        assert_eq!(response.status_code(), 500);
        assert!(project_files(&h.storage).is_empty());
        let registry = std::fs::read(h.storage.registry_path()).expect("registry");
        assert_eq!(registry, b"{not json");
    }

    #[tokio::test]
    async fn second_file_part_is_rejected() {
        let h = harness().await;
        let form =
            full_form("Jean", "tp.zip", b"zip").add_part("file", zip_part("tp2.zip", b"zip"));

        let response = h.server.post("/api/upload").multipart(form).await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["message"], "only one file may be submitted");
        assert!(project_files(&h.storage).is_empty());
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn name_collision_is_conflict_and_keeps_existing_archive() {
        let h = harness().await;
        let start = chrono::Local::now().timestamp_millis();
        let window = 10_000;
        for millis in start..start + window {
            std::fs::write(
                h.storage.projects_path().join(format!("{millis}_Jean_tp.zip")),
                b"original",
            )
            .expect("write");
        }

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "tp.zip", b"replacement"))
            .await;

        assert_eq!(response.status_code(), 409);
        let body: Value = response.json();
        let message = body["message"].as_str().unwrap_or_default();
        let existing = message
            .trim_start_matches("a submission named ")
            .trim_end_matches(" already exists");
        let kept = std::fs::read(h.storage.projects_path().join(existing)).expect("existing");
        assert_eq!(kept, b"original");
        assert_eq!(project_files(&h.storage).len(), window as usize);
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn oversized_text_field_is_rejected() {
        let h = harness().await;
        let form = MultipartForm::new()
            .add_text("name", "x".repeat(MAX_TEXT_FIELD_LEN + 1))
            .add_text("email", "jean@example.org")
            .add_text("subject", "Maths")
            .add_part("file", zip_part("tp.zip", b"zip"));

        let response = h.server.post("/api/upload").multipart(form).await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["message"], "field name is too long");
        assert!(project_files(&h.storage).is_empty());
    }

    #[tokio::test]
    async fn truncated_multipart_leaves_no_temp_file() {
        let h = harness().await;
        let body = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"name\"\r\n\r\n",
            "Jean\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"tp.zip\"\r\n",
            "Content-Type: application/zip\r\n\r\n",
            "PK\x03\x04 cut off mid-",
        );

        let response = h
            .server
            .post("/api/upload")
            .content_type("multipart/form-data; boundary=XBOUNDARY")
            .bytes(Bytes::from_static(body.as_bytes()))
            .await;

        assert_eq!(response.status_code(), 400);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
        assert!(project_files(&h.storage).is_empty());
        assert!(h.registry.read_all().await.expect("read").is_empty());
    }

    #[tokio::test]
    async fn depots_on_fresh_install_is_empty_array() {
        let h = harness().await;

        let response = h.server.get("/api/admin/depots").await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.json::<Value>(), Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn depots_lists_submissions_in_order_and_is_idempotent() {
        let h = harness().await;
        for name in ["Alice Martin", "Bob", "Chloé Petit"] {
            let response = h
                .server
                .post("/api/upload")
                .multipart(full_form(name, "projet.zip", name.as_bytes()))
                .await;
            assert_eq!(response.status_code(), 200);
        }

        let first: Vec<SubmissionRecord> = h.server.get("/api/admin/depots").await.json();
        let names: Vec<&str> = first.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Alice Martin", "Bob", "Chloé Petit"]);

        let second: Vec<SubmissionRecord> = h.server.get("/api/admin/depots").await.json();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn corrupt_registry_is_server_error() {
        let h = harness().await;
        std::fs::write(h.storage.registry_path(), b"{not json").expect("write");

        let response = h.server.get("/api/admin/depots").await;

        assert_eq!(response.status_code(), 500);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn download_round_trips_bytes() {
        let h = harness().await;
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let upload: Value = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean Dupont", "tp.zip", &data))
            .await
            .json();
        let stored = upload["data"]["storedFilename"]
            .as_str()
            .expect("stored filename")
            .to_string();

        let response = h.server.get(&format!("/api/download/{stored}")).await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.as_bytes().as_ref(), data.as_slice());
        let disposition = response.header("content-disposition");
        let disposition = disposition.to_str().expect("ascii header");
        assert!(disposition.starts_with("attachment;"));
        assert!(disposition.contains(&stored));
        assert_eq!(response.header("content-type"), "application/zip");
    }

    #[tokio::test]
    async fn download_supports_single_range() {
        let h = harness().await;
        std::fs::write(h.storage.projects_path().join("1_a_b.zip"), b"0123456789")
            .expect("write");

        let response = h
            .server
            .get("/api/download/1_a_b.zip")
            .add_header("Range", "bytes=2-5")
            .await;

        assert_eq!(response.status_code(), 206);
        assert_eq!(response.as_bytes().as_ref(), b"2345");
        assert_eq!(response.header("content-range"), "bytes 2-5/10");
    }

    #[tokio::test]
    async fn download_honours_if_range_with_echoed_last_modified() {
        let h = harness().await;
        let path = h.storage.projects_path().join("1_a_b.zip");
        std::fs::write(&path, b"0123456789").expect("write");
        let mtime = UNIX_EPOCH + Duration::from_millis(1_700_000_000_500);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(mtime))
            .expect("set mtime");

        let full = h.server.get("/api/download/1_a_b.zip").await;
        let last_modified = full.header("last-modified");
        let last_modified = last_modified.to_str().expect("ascii header");

        let response = h
            .server
            .get("/api/download/1_a_b.zip")
            .add_header("Range", "bytes=2-5")
            .add_header("If-Range", last_modified)
            .await;
        assert_eq!(response.status_code(), 206);
        assert_eq!(response.as_bytes().as_ref(), b"2345");

        let response = h
            .server
            .get("/api/download/1_a_b.zip")
            .add_header("Range", "bytes=2-5")
            .add_header("If-Range", "Wed, 01 Jan 2020 00:00:00 GMT")
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.as_bytes().as_ref(), b"0123456789");
    }

    #[tokio::test]
    async fn download_unknown_is_not_found() {
        let h = harness().await;

        let response = h.server.get("/api/download/never_stored.zip").await;

        assert_eq!(response.status_code(), 404);
        let body: Value = response.json();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn download_rejects_traversal_and_hidden_names() {
        let h = harness().await;
        std::fs::write(h.storage.registry_path(), b"[]").expect("write registry");

        for path in [
            "/api/download/..%2Fregistre_depots.json",
            "/api/download/..%5Cregistre_depots.json",
            "/api/download/.upload-123.tmp",
        ] {
            let response = h.server.get(path).await;
            assert_eq!(response.status_code(), 400, "{path}");
        }
    }

    #[tokio::test]
    async fn admin_routes_require_credentials_when_configured() {
        let h = harness_with(
            DEFAULT_MAX_UPLOAD_SIZE,
            AdminAuth::from_parts(Some("prof".into()), Some("secret".into())),
        )
        .await;

        let response = h.server.get("/api/admin/depots").await;
        assert_eq!(response.status_code(), 401);
        assert!(response.headers().contains_key("www-authenticate"));

        let response = h
            .server
            .get("/api/admin/depots")
            .add_header("Authorization", "Basic cHJvZjp3cm9uZw==")
            .await;
        assert_eq!(response.status_code(), 401);

        let response = h
            .server
            .post("/api/upload")
            .multipart(full_form("Jean", "tp.zip", b"zip"))
            .await;
        assert_eq!(response.status_code(), 200, "submission stays public");

        let response = h
            .server
            .get("/api/admin/depots")
            .add_header("Authorization", ADMIN_HEADER)
            .await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.json::<Vec<SubmissionRecord>>().len(), 1);

        let response = h.server.get("/api/download/anything.zip").await;
        assert_eq!(response.status_code(), 401);
    }

    #[tokio::test]
    async fn index_page_is_served_with_security_headers() {
        let h = harness().await;

        let response = h.server.get("/").await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("content-type"), "text/html");
        assert_eq!(response.header("x-frame-options"), "DENY");
        assert!(response.text().contains("/api/upload"));
    }
}
