//! Durable session state bridging the two issuance steps.
//!
//! Between handing out challenge instructions and verifying them, a human
//! publishes DNS records or HTTP files. Whatever serves the second step is
//! a fresh process, so everything it needs lives in a [`SessionState`]
//! record: plain strings and JSON bodies, no live handles. The store is a
//! simple keyed byte store; the intention is to make it simple to implement
//! other persistence mechanisms than the provided ones, such as against a
//! database.
//!
//! [`SessionState`]: struct.SessionState.html

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::api::{ApiDirectory, ApiOrder};
use crate::order::{Challenge, ChallengeKind};
use crate::{Error, Result};

/// Everything needed to resume an issuance from a fresh process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub request_id: String,
    pub contact_email: String,
    /// Account private key, PKCS#8 PEM. Stable for the life of the account.
    pub account_key_pem: String,
    /// Per-order certificate key, PKCS#8 PEM. Never reused across orders.
    pub domain_key_pem: String,
    pub account_url: String,
    pub order_url: String,
    pub order: ApiOrder,
    pub directory: ApiDirectory,
    /// Last nonce seen before the pause. A resumed session never trusts
    /// this; it refetches via newNonce before the first signed request.
    pub nonce: Option<String>,
    pub method: ChallengeKind,
    pub challenges: Vec<Challenge>,
    /// Unix timestamp (seconds) after which the session is purged.
    pub expires_at: i64,
}

impl SessionState {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn domains(&self) -> Vec<&str> {
        self.challenges.iter().map(|c| c.domain.as_str()).collect()
    }
}

/// Trait for a session persistence implementation.
///
/// Implementations must be clonable and thread safe (Send). This can easily
/// be done by wrapping the implementation in an `Arc<Mutex<S>>`.
pub trait SessionStore: Clone + Send {
    /// Store the given bytes under the given request id.
    fn put(&self, request_id: &str, value: &[u8]) -> Result<()>;
    /// Read the bytes stored under the given request id.
    ///
    /// `None` if the value doesn't exist.
    fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>>;
    /// Delete the entry for the given request id, if any.
    fn remove(&self, request_id: &str) -> Result<()>;
    /// All stored request ids, for the expiry sweep.
    fn request_ids(&self) -> Result<Vec<String>>;
}

pub(crate) fn save_session<S: SessionStore>(store: &S, state: &SessionState) -> Result<()> {
    let bytes = serde_json::to_vec(state)
        .map_err(|e| Error::Serialization(format!("encode session: {}", e)))?;
    debug!("Save session {}", state.request_id);
    store.put(&state.request_id, &bytes)
}

pub(crate) fn load_session<S: SessionStore>(store: &S, request_id: &str) -> Result<SessionState> {
    let bytes = store.get(request_id)?.ok_or_else(|| {
        Error::Serialization(format!("unknown or expired request id: {}", request_id))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Serialization(format!("corrupt session state: {}", e)))
}

/// Purge entries past their expiry. Runs lazily on store access.
pub(crate) fn sweep_expired<S: SessionStore>(store: &S, now: i64) -> Result<()> {
    for id in store.request_ids()? {
        if let Some(bytes) = store.get(&id)? {
            match serde_json::from_slice::<SessionState>(&bytes) {
                Ok(state) if !state.is_expired(now) => {}
                // expired and unreadable entries are both dropped
                _ => {
                    debug!("Purge session {}", id);
                    store.remove(&id)?;
                }
            }
        }
    }
    Ok(())
}

/// Memory implementation for dev/testing.
///
/// The entries are gone when the process dies, which defeats the purpose
/// of pausing an issuance; use [`FileStore`] or an own implementation for
/// anything real.
///
/// [`FileStore`]: struct.FileStore.html
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            ..Default::default()
        }
    }
}

impl SessionStore for MemoryStore {
    fn put(&self, request_id: &str, value: &[u8]) -> Result<()> {
        let mut lock = self.inner.lock().unwrap();
        lock.insert(request_id.to_string(), value.to_owned());
        Ok(())
    }
    fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>> {
        let lock = self.inner.lock().unwrap();
        Ok(lock.get(request_id).cloned())
    }
    fn remove(&self, request_id: &str) -> Result<()> {
        let mut lock = self.inner.lock().unwrap();
        lock.remove(request_id);
        Ok(())
    }
    fn request_ids(&self) -> Result<Vec<String>> {
        let lock = self.inner.lock().unwrap();
        Ok(lock.keys().cloned().collect())
    }
}

/// Simple file persistence.
///
/// Each session is saved under a unique filename. Since the records hold
/// private keys, the files are created readable by the owner only.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a file store in the directory pointed out by the `dir` given.
    ///
    /// The directory must be writable.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        FileStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_name_of(&self, request_id: &str) -> PathBuf {
        // ids are generated hex, but never trust a caller-supplied id to be
        // a safe file name
        let safe: String = request_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        self.dir.join(format!("{}{}{}", FILE_PREFIX, safe, FILE_SUFFIX))
    }
}

const FILE_PREFIX: &str = "acme-session-";
const FILE_SUFFIX: &str = ".json";

impl SessionStore for FileStore {
    #[cfg(not(unix))]
    fn put(&self, request_id: &str, value: &[u8]) -> Result<()> {
        let f_name = self.file_name_of(request_id);
        fs::write(f_name, value).map_err(store_io)
    }

    #[cfg(unix)]
    fn put(&self, request_id: &str, value: &[u8]) -> Result<()> {
        let f_name = self.file_name_of(request_id);
        let mut f = fs::File::create(f_name).map_err(store_io)?;
        let mut permissions = f.metadata().map_err(store_io)?.permissions();
        permissions.set_mode(0o600);
        f.set_permissions(permissions).map_err(store_io)?;
        f.write_all(value).map_err(store_io)
    }

    fn get(&self, request_id: &str) -> Result<Option<Vec<u8>>> {
        let f_name = self.file_name_of(request_id);
        let ret = if let Ok(mut file) = fs::File::open(f_name) {
            let mut v = vec![];
            file.read_to_end(&mut v).map_err(store_io)?;
            Some(v)
        } else {
            None
        };
        Ok(ret)
    }

    fn remove(&self, request_id: &str) -> Result<()> {
        let f_name = self.file_name_of(request_id);
        match fs::remove_file(f_name) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_io(e)),
        }
    }

    fn request_ids(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(store_io(e)),
        };
        for entry in entries {
            let entry = entry.map_err(store_io)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                ids.push(name[FILE_PREFIX.len()..name.len() - FILE_SUFFIX.len()].to_string());
            }
        }
        Ok(ids)
    }
}

fn store_io(e: std::io::Error) -> Error {
    Error::Serialization(format!("session store io: {}", e))
}

#[cfg(test)]
mod test {
    use super::*;

    fn dummy_state(request_id: &str, expires_at: i64) -> SessionState {
        SessionState {
            request_id: request_id.into(),
            contact_email: "foo@bar.com".into(),
            account_key_pem: "ACCOUNT PEM".into(),
            domain_key_pem: "DOMAIN PEM".into(),
            account_url: "https://ca/acme/acct/1".into(),
            order_url: "https://ca/acme/order/1".into(),
            order: Default::default(),
            directory: Default::default(),
            nonce: Some("stale".into()),
            method: ChallengeKind::Http01,
            challenges: vec![],
            expires_at,
        }
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        let state = dummy_state("abc123", 10_000);
        save_session(&store, &state).unwrap();
        let restored = load_session(&store, "abc123").unwrap();
        assert_eq!(state, restored);

        store.remove("abc123").unwrap();
        assert!(load_session(&store, "abc123").is_err());
    }

    #[test]
    fn test_unknown_id_is_serialization_error() {
        let store = MemoryStore::new();
        match load_session(&store, "nope") {
            Err(Error::Serialization(msg)) => assert!(msg.contains("nope")),
            other => panic!("expected Serialization error, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_state_is_serialization_error() {
        let store = MemoryStore::new();
        store.put("broken", b"{not json").unwrap();
        assert!(matches!(
            load_session(&store, "broken"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_sweep_purges_expired_only() {
        let store = MemoryStore::new();
        save_session(&store, &dummy_state("old", 100)).unwrap();
        save_session(&store, &dummy_state("live", 10_000)).unwrap();

        sweep_expired(&store, 5_000).unwrap();

        assert!(store.get("old").unwrap().is_none());
        assert!(store.get("live").unwrap().is_some());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("acme-twostep-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = FileStore::new(&dir);

        let state = dummy_state("f1e2d3", 10_000);
        save_session(&store, &state).unwrap();
        assert_eq!(store.request_ids().unwrap(), vec!["f1e2d3".to_string()]);
        assert_eq!(load_session(&store, "f1e2d3").unwrap(), state);

        store.remove("f1e2d3").unwrap();
        assert!(store.request_ids().unwrap().is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_sanitizes_ids() {
        let store = FileStore::new("/tmp");
        let name = store.file_name_of("../../etc/passwd");
        assert_eq!(
            name,
            PathBuf::from("/tmp/acme-session-etcpasswd.json")
        );
    }
}
