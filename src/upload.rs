//! 项目提交：接收单个 ZIP 文件与表单字段，落盘后写入登记簿。

use axum::extract::Extension;
use axum::extract::multipart::{Field, Multipart, MultipartError, MultipartRejection};
use axum::response::Json as JsonResponse;
use chrono::Local;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::atomic::AtomicFile;
use crate::config::{MAX_STORED_NAME_BYTES, MAX_STORED_ORIGINAL_BYTES, MAX_TEXT_FIELD_LEN};
use crate::error::ApiError;
use crate::registry::{Registry, RegistryError, SubmissionRecord};
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_file_size: u64,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("all fields are required (name, email, subject)")]
    MissingFields,
    #[error("no file provided")]
    MissingFile,
    #[error("only one file may be submitted")]
    DuplicateFile,
    #[error("only ZIP files are accepted")]
    RejectedType,
    #[error("file exceeds the maximum size of {} MB", .0 / 1024 / 1024)]
    TooLarge(u64),
    #[error("field {0} is too long")]
    FieldTooLong(String),
    #[error("field {0} is not valid UTF-8")]
    InvalidText(String),
    #[error("malformed upload: {0}")]
    Multipart(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        UploadError::Multipart(err.body_text())
    }
}

#[derive(Serialize)]
pub struct SubmitResponse {
    success: bool,
    message: String,
    data: SubmissionRecord,
}

#[derive(Default)]
struct SubmissionForm {
    name: Option<String>,
    email: Option<String>,
    subject: Option<String>,
    client_timestamp: Option<String>,
}

struct ReceivedFile {
    temp: AtomicFile,
    original_name: String,
    size: u64,
}

/// 接收项目提交。
pub async fn submit_project(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(registry): Extension<Arc<Registry>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<SubmitResponse>, ApiError> {
    let multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    match store_submission(&storage, &registry, &upload, multipart).await {
        Ok(record) => Ok(JsonResponse(SubmitResponse {
            success: true,
            message: "project submitted successfully".into(),
            data: record,
        })),
        Err(err) => {
            if !matches!(err, UploadError::Io(_) | UploadError::Registry(_)) {
                warn!(error = %err, "upload rejected");
            }
            Err(err.into())
        }
    }
}

async fn store_submission(
    storage: &Storage,
    registry: &Registry,
    upload: &UploadConfig,
    mut multipart: Multipart,
) -> Result<SubmissionRecord, UploadError> {
    let mut form = SubmissionForm::default();
    let mut received = None;
    if let Err(err) = read_parts(storage, upload, &mut multipart, &mut form, &mut received).await {
        if let Some(file) = received {
            file.temp.cleanup().await;
        }
        return Err(err);
    }

    let (Some(name), Some(email), Some(subject)) = (form.name, form.email, form.subject) else {
        if let Some(file) = received {
            file.temp.cleanup().await;
        }
        return Err(UploadError::MissingFields);
    };
    let Some(file) = received else {
        return Err(UploadError::MissingFile);
    };

    let now = Local::now();
    let stored_filename =
        build_stored_filename(now.timestamp_millis(), &name, &file.original_name);
    let target = storage.projects_path().join(&stored_filename);
    file.temp
        .persist_new(&target)
        .await
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => UploadError::AlreadyExists(stored_filename.clone()),
            _ => UploadError::Io(err),
        })?;

    let record = SubmissionRecord {
        name,
        email,
        subject,
        stored_filename,
        file_size_bytes: file.size,
        deposited_at: now.format("%d/%m/%Y %H:%M:%S").to_string(),
        client_timestamp: form.client_timestamp.map(serde_json::Value::String),
    };
    let count = match registry.append(record.clone()).await {
        Ok(count) => count,
        Err(err) => {
            if let Err(remove_err) = fs::remove_file(&target).await {
                warn!(path = ?target, error = %remove_err, "failed to remove unregistered archive");
            }
            return Err(err.into());
        }
    };

    info!(
        stored_filename = record.stored_filename,
        size = record.file_size_bytes,
        subject = record.subject,
        count,
        "project submitted"
    );
    Ok(record)
}

async fn read_parts(
    storage: &Storage,
    upload: &UploadConfig,
    multipart: &mut Multipart,
    form: &mut SubmissionForm,
    received: &mut Option<ReceivedFile>,
) -> Result<(), UploadError> {
    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        let slot = match field_name.as_str() {
            "file" => {
                if received.is_some() {
                    return Err(UploadError::DuplicateFile);
                }
                let original_name = field.file_name().map(original_file_name).unwrap_or_default();
                if !is_zip_name(&original_name) {
                    return Err(UploadError::RejectedType);
                }
                let mut temp = AtomicFile::create(storage.upload_temp_path()).await?;
                match write_field(&mut field, &mut temp, upload.max_file_size).await {
                    Ok(size) => {
                        *received = Some(ReceivedFile {
                            temp,
                            original_name,
                            size,
                        });
                    }
                    Err(err) => {
                        temp.cleanup().await;
                        return Err(err);
                    }
                }
                continue;
            }
            "name" | "nom" => &mut form.name,
            "email" => &mut form.email,
            "subject" | "matiere" => &mut form.subject,
            "clientTimestamp" | "timestamp" => &mut form.client_timestamp,
            _ => continue,
        };
        let value = read_text(&mut field, &field_name).await?;
        let value = value.trim();
        *slot = (!value.is_empty()).then(|| value.to_string());
    }
    Ok(())
}

async fn write_field(
    field: &mut Field<'_>,
    temp: &mut AtomicFile,
    limit: u64,
) -> Result<u64, UploadError> {
    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > limit {
            return Err(UploadError::TooLarge(limit));
        }
        temp.file_mut().write_all(&chunk).await?;
    }
    Ok(written)
}

async fn read_text(field: &mut Field<'_>, field_name: &str) -> Result<String, UploadError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_LEN {
            return Err(UploadError::FieldTooLong(field_name.to_string()));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| UploadError::InvalidText(field_name.to_string()))
}

/// `<epoch_millis>_<name>_<original>`：姓名中的连续空白替换为单个下划线。
///
/// 姓名段与原始文件名段分别按字节截断（保留扩展名），避免超出文件系统的文件名长度限制。
pub fn build_stored_filename(epoch_millis: i64, name: &str, original: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        sanitized.push(if is_path_hostile(c) { '_' } else { c });
    }
    let sanitized = truncate_on_char_boundary(&sanitized, MAX_STORED_NAME_BYTES);
    let original = cap_original_name(original);
    format!("{epoch_millis}_{sanitized}_{original}")
}

/// 截断过长的原始文件名，扩展名原样保留。
fn cap_original_name(original: &str) -> String {
    if original.len() <= MAX_STORED_ORIGINAL_BYTES {
        return original.to_string();
    }
    match original.rfind('.') {
        Some(dot) if original.len() - dot < MAX_STORED_ORIGINAL_BYTES => {
            let (stem, ext) = original.split_at(dot);
            let stem = truncate_on_char_boundary(stem, MAX_STORED_ORIGINAL_BYTES - ext.len());
            format!("{stem}{ext}")
        }
        _ => truncate_on_char_boundary(original, MAX_STORED_ORIGINAL_BYTES).to_string(),
    }
}

fn truncate_on_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// 仅保留客户端文件名的最后一段。
fn original_file_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    last.chars()
        .map(|c| if is_path_hostile(c) { '_' } else { c })
        .collect()
}

fn is_path_hostile(c: char) -> bool {
    matches!(c, '/' | '\\') || c.is_control()
}

fn is_zip_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}
