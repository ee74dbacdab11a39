//! AxoDepot server binary.
//!
//! A project submission service: students upload a ZIP archive with their
//! name, email and subject; the server stores the archive, appends a record
//! to a JSON registry and exposes the registry and the archives to admins.

mod app;
mod atomic;
mod auth;
mod config;
mod error;
mod etag;
mod files;
mod frontend;
mod http;
mod logging;
mod registry;
mod storage;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::app::{AppContext, build_router};
use crate::auth::AdminAuth;
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the AxoDepot server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Storage::provision(PathBuf::from(&args.storage_dir)).await?;
    match storage
        .sweep_stale_uploads(Duration::from_secs(args.temp_ttl_secs))
        .await
    {
        Ok(0) => {}
        Ok(removed) => info!(removed, "swept stale upload temp files"),
        Err(err) => warn!(error = %err, "upload temp sweep failed"),
    }

    let admin = AdminAuth::from_parts(args.admin_user.clone(), args.admin_pass.clone());
    if !admin.is_enabled() {
        warn!(
            "⚠️ admin routes (/api/admin/depots, /api/download) are NOT protected; \
             set DEPOT_ADMIN_USER and DEPOT_ADMIN_PASS to require credentials"
        );
    }
    let upload = UploadConfig {
        max_file_size: args.max_upload_size,
    };
    info!(
        root = ?storage.root_path(),
        projects_dir = ?storage.projects_path(),
        registry = ?storage.registry_path(),
        max_upload_size = args.max_upload_size,
        "storage ready"
    );

    let mut app = build_router(AppContext::new(storage, upload, admin));
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(http_addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
