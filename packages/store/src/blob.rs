//! Content-addressed blob storage with human-assigned aliases.
//!
//! Blobs are identified by the lower-case hex SHA-256 of their bytes. An
//! alias maps a name to a content id; re-registering a name points it at the
//! new content.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::kv::KvStore;

/// Prefix marking a reference as a literal content id.
pub const CONTENT_ID_SCHEME: &str = "techID://";

/// Content address of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId(String);

impl ContentId {
    /// Hash bytes into their content id.
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Wrap an id string as-is.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata stored next to each blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAbstract {
    pub content_type: String,
    pub length: usize,
}

/// Blob storage over a [`KvStore`].
#[derive(Clone)]
pub struct BlobStore {
    kv: Arc<dyn KvStore>,
}

fn abstract_key(id: &ContentId) -> String {
    format!("/blobs/byid/{}/abstract", id)
}

fn bytes_key(id: &ContentId) -> String {
    format!("/blobs/byid/{}/bytes", id)
}

fn name_key(name: &str) -> String {
    format!("/blobs/byname/{}", name)
}

impl BlobStore {
    /// Create a blob store writing into `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The underlying key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Store bytes and return their content id. Registering the same bytes
    /// with the same content type is a no-op; a different content type
    /// replaces the recorded one and leaves the bytes alone.
    pub fn register_blob(&self, content_type: &str, bytes: &[u8]) -> Result<ContentId> {
        let id = ContentId::of(bytes);
        let abstract_ = BlobAbstract {
            content_type: content_type.to_string(),
            length: bytes.len(),
        };

        match self.kv.get(abstract_key(&id).as_bytes())? {
            Some(stored) => {
                let stored: BlobAbstract = serde_json::from_slice(&stored)?;
                if stored == abstract_ {
                    return Ok(id);
                }
                self.kv
                    .put(abstract_key(&id).as_bytes(), &serde_json::to_vec(&abstract_)?)?;
                tracing::info!(id = %id, from = %stored.content_type, to = content_type, "retyped blob");
            }
            None => {
                self.kv
                    .put(abstract_key(&id).as_bytes(), &serde_json::to_vec(&abstract_)?)?;
                self.kv.put(bytes_key(&id).as_bytes(), bytes)?;
                tracing::info!(id = %id, content_type, size = bytes.len(), "registered blob");
            }
        }
        Ok(id)
    }

    /// Store bytes and point `name` at them.
    pub fn register_blob_with_name(
        &self,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<ContentId> {
        let id = self.register_blob(content_type, bytes)?;
        self.kv
            .put(name_key(name).as_bytes(), id.as_str().as_bytes())?;

        tracing::info!(name, id = %id, "registered blob alias");
        Ok(id)
    }

    /// Resolve an alias to a content id.
    pub fn resolve_alias(&self, name: &str) -> Result<ContentId> {
        let id = self
            .kv
            .get(name_key(name).as_bytes())?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let id = String::from_utf8(id).map_err(|e| StoreError::Backend {
            message: format!("alias '{}' holds a non-utf8 id: {}", name, e),
        })?;
        Ok(ContentId(id))
    }

    /// Whether an alias exists.
    pub fn has_alias(&self, name: &str) -> Result<bool> {
        Ok(self.kv.get(name_key(name).as_bytes())?.is_some())
    }

    /// Resolve either a `techID://<id>` reference or an alias.
    pub fn resolve_reference(&self, reference: &str) -> Result<ContentId> {
        match reference.strip_prefix(CONTENT_ID_SCHEME) {
            Some(id) => Ok(ContentId(id.to_string())),
            None => self.resolve_alias(reference),
        }
    }

    /// Metadata of a blob.
    pub fn abstract_of(&self, id: &ContentId) -> Result<BlobAbstract> {
        let bytes = self
            .kv
            .get(abstract_key(id).as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Bytes of a blob.
    pub fn get_bytes(&self, id: &ContentId) -> Result<Vec<u8>> {
        self.kv
            .get(bytes_key(id).as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Every alias with the id it points at, ordered by name.
    pub fn names(&self) -> Result<Vec<(String, ContentId)>> {
        let prefix = name_key("");
        self.kv
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, id)| {
                let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
                let id = String::from_utf8_lossy(&id).into_owned();
                Ok((name, ContentId(id)))
            })
            .collect()
    }
}
