//! 临时写入与原子落盘的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 先写临时文件，完成后再移动到目标路径。
pub struct AtomicFile {
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在指定路径创建临时文件（路径必须尚不存在）。
    pub async fn create(temp_path: PathBuf) -> io::Result<Self> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        Ok(Self { temp_path, file })
    }

    /// 在目标文件同目录创建隐藏临时文件。
    pub async fn beside(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        Self::create(parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()))).await
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 原子替换目标文件（已存在则覆盖）。
    pub async fn persist(mut self, target: &Path) -> io::Result<()> {
        if let Err(err) = self.flush_and_sync().await {
            self.cleanup().await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(target).await.is_ok()
                    && fs::rename(&self.temp_path, target).await.is_ok()
                {
                    sync_parent(target).await;
                    return Ok(());
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        sync_parent(target).await;
        Ok(())
    }

    /// 落盘到目标路径，目标已存在时返回 `AlreadyExists` 且不覆盖。
    pub async fn persist_new(mut self, target: &Path) -> io::Result<()> {
        if let Err(err) = self.flush_and_sync().await {
            self.cleanup().await;
            return Err(err);
        }
        drop(self.file);

        let linked = fs::hard_link(&self.temp_path, target).await;
        let _ = fs::remove_file(&self.temp_path).await;
        linked?;

        sync_parent(target).await;
        Ok(())
    }

    async fn flush_and_sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

async fn sync_parent(target: &Path) {
    if let Some(parent) = target.parent() {
        let _ = sync_dir(parent).await;
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
