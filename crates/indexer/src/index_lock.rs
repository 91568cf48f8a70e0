use crate::{CorpusError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock held by the one run allowed to write an index file.
#[derive(Debug)]
pub struct IndexWriteLock {
    file: std::fs::File,
    path: PathBuf,
}

impl IndexWriteLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_path_for_index(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

pub(crate) async fn acquire_index_write_lock(index_path: &Path) -> Result<IndexWriteLock> {
    let path = lock_path_for_index(index_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                CorpusError::Other(format!("open index lock {}: {err}", path.display()))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(IndexWriteLock { file, path }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                Err(CorpusError::IndexLocked(path))
            }
            Err(err) => Err(CorpusError::Other(format!(
                "acquire index lock {}: {err}",
                path.display()
            ))),
        }
    })
    .await
    .map_err(|err| CorpusError::Other(format!("join index lock task: {err}")))?
}
