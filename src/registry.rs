//! 提交登记簿：单个 JSON 数组文件，只追加。

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, ErrorKind};
use tokio::sync::Mutex;
use tracing::debug;

use crate::atomic::AtomicFile;

/// 一次成功提交的登记记录。旧版字段名仅用于读取。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(alias = "nom")]
    pub name: String,
    pub email: String,
    #[serde(alias = "matiere")]
    pub subject: String,
    #[serde(alias = "fichier")]
    pub stored_filename: String,
    #[serde(alias = "taille")]
    pub file_size_bytes: u64,
    #[serde(alias = "dateDepot")]
    pub deposited_at: String,
    /// 客户端提供的原始值（字符串或数字），原样保存。
    ///
    /// 刻意设为可选：提交时从不要求该字段，旧登记簿中也可能缺失。
    #[serde(alias = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("corrupt registry: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("registry encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("registry io: {0}")]
    Io(#[from] io::Error),
}

/// 登记簿文件的唯一持有者；追加操作经 `write_lock` 串行化。
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// 读取全部记录；文件不存在时返回空列表。
    pub async fn read_all(&self) -> Result<Vec<SubmissionRecord>, RegistryError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RegistryError::Io(err)),
        };
        serde_json::from_slice(&bytes).map_err(RegistryError::Corrupt)
    }

    /// 追加一条记录并整体重写文件，返回追加后的记录总数。
    pub async fn append(&self, record: SubmissionRecord) -> Result<usize, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        records.push(record);

        let content = serde_json::to_vec_pretty(&records).map_err(RegistryError::Encode)?;
        let mut atomic = AtomicFile::beside(&self.path).await?;
        if let Err(err) = atomic.file_mut().write_all(&content).await {
            atomic.cleanup().await;
            return Err(err.into());
        }
        atomic.persist(&self.path).await?;

        debug!(count = records.len(), "registry updated");
        Ok(records.len())
    }
}
