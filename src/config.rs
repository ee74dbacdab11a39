//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const PROJECTS_DIR: &str = "projets";
pub const REGISTRY_FILE: &str = "registre_depots.json";
pub const UPLOAD_TEMP_PREFIX: &str = ".upload-";
pub const UPLOAD_TEMP_SUFFIX: &str = ".tmp";
pub const ADMIN_REALM: &str = "depot admin";
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const MAX_TEXT_FIELD_LEN: usize = 64 * 1024;
/// 存储文件名中姓名段与原始文件名段的字节上限，总长保持在 255 以内。
pub const MAX_STORED_NAME_BYTES: usize = 64;
pub const MAX_STORED_ORIGINAL_BYTES: usize = 128;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-depot", version = VERSION_INFO, about = "Project submission server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "DEPOT_STORAGE_DIR",
        default_value = "/var/data/uploads",
        help = "Upload root (registry file and projects directory)"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "DEPOT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DEPOT_HTTP_PORT",
        default_value_t = 3000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        long,
        env = "DEPOT_CORS_ORIGINS",
        default_value = "*",
        help = "Comma separated CORS origins (* for any)"
    )]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "DEPOT_MAX_UPLOAD_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max size of one submitted archive in bytes"
    )]
    pub max_upload_size: u64,
    #[arg(long, env = "DEPOT_ADMIN_USER", help = "Basic auth user for admin routes")]
    pub admin_user: Option<String>,
    #[arg(long, env = "DEPOT_ADMIN_PASS", help = "Basic auth password for admin routes")]
    pub admin_pass: Option<String>,
    #[arg(
        long,
        env = "DEPOT_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Orphaned upload temp file age before startup sweep (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
}
