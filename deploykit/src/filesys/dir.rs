//! Directory operations

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::utils::hex;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), DeployError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), DeployError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List subdirectories
    pub async fn list_dirs(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut dirs = Vec::new();
        if !self.exists().await {
            return Ok(dirs);
        }
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }

        dirs.sort();
        Ok(dirs)
    }

    /// List regular files directly in this directory
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut files = Vec::new();
        if !self.exists().await {
            return Ok(files);
        }
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Get a file within this directory
    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Rename this directory, returning the new reference
    pub async fn rename_to(&self, target: &Dir) -> Result<Dir, DeployError> {
        fs::rename(&self.path, &target.path).await?;
        Ok(target.clone())
    }

    /// Flush the directory entry itself to disk so renames inside it survive a crash.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn sync(&self) -> Result<(), DeployError> {
        #[cfg(unix)]
        {
            let handle = fs::File::open(&self.path).await?;
            handle.sync_all().await?;
        }
        Ok(())
    }

    /// Relative paths of every regular file below this directory, sorted by byte order.
    ///
    /// Paths use `/` separators and no leading `./`. A missing directory has no files.
    pub async fn walk_files(&self) -> Result<Vec<String>, DeployError> {
        let mut files = Vec::new();
        if !self.exists().await {
            return Ok(files);
        }

        let mut pending = vec![(self.path.clone(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), relative));
                } else if file_type.is_file() {
                    files.push(relative);
                }
            }
        }

        files.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        Ok(files)
    }

    /// Content digest of the tree: `sha256:` over one `"<file sha256>  ./<path>\n"` line per file.
    ///
    /// Matches `find . -type f -print0 | LC_ALL=C sort -z | xargs -0 sha256sum | sha256sum`.
    pub async fn digest(&self) -> Result<String, DeployError> {
        let mut manifest = Sha256::new();
        for relative in self.walk_files().await? {
            let file_hash = hash_file(&self.path.join(&relative)).await?;
            manifest.update(format!("{}  ./{}\n", file_hash, relative).as_bytes());
        }
        Ok(format!("sha256:{}", hex::encode(manifest.finalize())))
    }

    /// Recursively copy the contents of this directory into `target`, fsyncing every file.
    ///
    /// `target` is created if missing. Symlinks are recreated on Unix and skipped elsewhere.
    /// Fails with `NotFound` when this directory does not exist.
    pub async fn copy_to(&self, target: &Dir) -> Result<(), DeployError> {
        if !self.exists().await {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", self.path.display()),
            )
            .into());
        }
        target.create().await?;

        let mut pending = vec![(self.path.clone(), target.path.clone())];
        while let Some((src, dst)) = pending.pop() {
            let mut entries = fs::read_dir(&src).await?;
            while let Some(entry) = entries.next_entry().await? {
                let from = entry.path();
                let to = dst.join(entry.file_name());
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    fs::create_dir_all(&to).await?;
                    pending.push((from, to));
                } else if file_type.is_file() {
                    fs::copy(&from, &to).await?;
                    fs::File::open(&to).await?.sync_all().await?;
                } else if file_type.is_symlink() {
                    #[cfg(unix)]
                    {
                        let link = fs::read_link(&from).await?;
                        fs::symlink(link, &to).await?;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn hash_file(path: &Path) -> Result<String, DeployError> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
