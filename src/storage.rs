//! 存储路径：上传根目录、项目目录与下载文件名解析。

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::{info, warn};

use crate::config::{PROJECTS_DIR, REGISTRY_FILE, UPLOAD_TEMP_PREFIX, UPLOAD_TEMP_SUFFIX};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 已初始化的存储布局，启动时创建一次，之后按句柄共享。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    projects: PathBuf,
}

impl Storage {
    /// 创建上传根目录与项目子目录（幂等）。
    pub async fn provision(root: PathBuf) -> io::Result<Self> {
        let projects = root.join(PROJECTS_DIR);
        fs::create_dir_all(&projects).await?;
        Ok(Self { root, projects })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn projects_path(&self) -> &Path {
        &self.projects
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// 解析项目目录中的文件名，拒绝任何可能逃逸出项目目录的名称。
    pub async fn resolve_project_file(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_file_name(name)?;
        let target = self.projects.join(name);
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidName),
            Ok(_) => Ok(target),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 为一次上传生成项目目录内的临时文件路径。
    pub fn upload_temp_path(&self) -> PathBuf {
        self.projects.join(format!(
            "{UPLOAD_TEMP_PREFIX}{}{UPLOAD_TEMP_SUFFIX}",
            uuid::Uuid::new_v4()
        ))
    }

    /// 清理进程异常退出后遗留的上传临时文件。
    pub async fn sweep_stale_uploads(&self, ttl: Duration) -> io::Result<usize> {
        if ttl.is_zero() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.projects).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(UPLOAD_TEMP_PREFIX) || !name.ends_with(UPLOAD_TEMP_SUFFIX) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if !matches!(age, Some(age) if age >= ttl) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = ?path, "removed stale upload temp file");
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = ?path, error = %err, "failed to remove stale upload temp file"),
            }
        }

        Ok(removed)
    }
}

/// 单段文件名校验：不允许分隔符、`.`/`..`、隐藏文件与 NUL。
pub fn validate_file_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute()
    {
        return Err(StorageError::InvalidName);
    }
    Ok(())
}
