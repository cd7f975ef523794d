//! Guest-visible key-value persistence, namespaced under `/persistence`.

use std::sync::Arc;

use crate::error::Result;
use crate::kv::KvStore;

const PREFIX: &[u8] = b"/persistence";

/// Namespaced view of a [`KvStore`] handed to guests.
#[derive(Clone)]
pub struct Persistence {
    kv: Arc<dyn KvStore>,
}

impl Persistence {
    /// Create a view over `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(key: &[u8]) -> Vec<u8> {
        [PREFIX, key].concat()
    }

    /// Store a value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.kv.put(&Self::key(key), value)
    }

    /// Read a value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.kv.get(&Self::key(key))
    }

    /// Every pair whose guest key starts with `prefix`, with the namespace
    /// stripped from the returned keys.
    pub fn subset(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .kv
            .scan_prefix(&Self::key(prefix))?
            .into_iter()
            .map(|(key, value)| (key[PREFIX.len()..].to_vec(), value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn keys_are_namespaced() {
        let kv = Arc::new(MemoryKv::new());
        let persistence = Persistence::new(kv.clone());

        persistence.set(b"/counter", b"1").unwrap();
        assert_eq!(kv.get(b"/persistence/counter").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(persistence.get(b"/counter").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(persistence.get(b"/other").unwrap(), None);
    }

    #[test]
    fn subset_strips_namespace() {
        let persistence = Persistence::new(Arc::new(MemoryKv::new()));
        persistence.set(b"/users/1", b"ann").unwrap();
        persistence.set(b"/users/2", b"bob").unwrap();
        persistence.set(b"/groups/1", b"admins").unwrap();

        let users = persistence.subset(b"/users/").unwrap();
        assert_eq!(
            users,
            vec![
                (b"/users/1".to_vec(), b"ann".to_vec()),
                (b"/users/2".to_vec(), b"bob".to_vec()),
            ]
        );
    }
}
