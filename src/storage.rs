use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Local store for uploaded article images.
///
/// Articles keep either an external http(s) URL or a path to an asset inside this store;
/// only the latter is ever removed from disk.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a stored image reference to a file inside the store, by file name only.
    fn resolve(&self, image: &str) -> Option<PathBuf> {
        if crate::is_external_url(image) {
            return None;
        }
        let file_name = Path::new(image).file_name()?;
        Some(self.root.join(file_name))
    }

    /// Removes the asset behind `image`. Missing files and external URLs are not errors.
    pub async fn remove(&self, image: &str) -> Result<()> {
        let Some(path) = self.resolve(image) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Removed image {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_stored_asset_by_file_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("1681-cover.png");
        std::fs::write(&file, b"png").unwrap();

        let store = ImageStore::new(dir.path());
        store.remove("file/upload/articles/1681-cover.png").await.unwrap();

        assert!(!file.exists());
    }

    #[tokio::test]
    async fn ignores_external_urls_and_missing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ImageStore::new(dir.path());

        store.remove("https://example.com/cover.png").await.unwrap();
        store.remove("gone.png").await.unwrap();
    }
}
