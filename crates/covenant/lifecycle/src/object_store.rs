use async_trait::async_trait;
use covenant_types::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Blob storage capability for contract files and evidence.
///
/// The engine never serves file bytes to callers; reads go through
/// short-lived signed URLs minted here.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> CoreResult<()>;

    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> CoreResult<()>;

    async fn exists(&self, key: &str) -> CoreResult<bool>;

    /// Mint a time-limited download URL for an existing object.
    async fn signed_url(&self, key: &str, expires_in: Duration) -> CoreResult<String>;
}

/// In-process object store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CoreError {
    CoreError::Storage("object store lock poisoned".to_string())
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> CoreResult<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.objects.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CoreResult<bool> {
        Ok(self.objects.read().map_err(|_| poisoned())?.contains_key(key))
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> CoreResult<String> {
        if !self.exists(key).await? {
            return Err(CoreError::NotFound(format!("object {key} not found")));
        }
        Ok(format!("memory://{key}?expires_in={}", expires_in.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = InMemoryObjectStore::new();
        store.put("a/b", b"bytes".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), Some(b"bytes".to_vec()));

        let url = store
            .signed_url("a/b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.contains("a/b"));

        store.delete("a/b").await.unwrap();
        assert!(!store.exists("a/b").await.unwrap());
        assert!(matches!(
            store.signed_url("a/b", Duration::from_secs(60)).await,
            Err(CoreError::NotFound(_))
        ));
    }
}
