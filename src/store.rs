use crate::session::{Session, Turn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Key holding the serialized session map
pub const SESSIONS_KEY: &str = "chat_sessions";
/// Key holding the id of the session that was active at last save
pub const ACTIVE_SESSION_KEY: &str = "active_session";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key/blob persistence capability, local to this client
pub trait StorageBackend: Send {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError>;
}

/// Stores each key as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        let to_err = |source| StoreError::Write {
            key: key.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(to_err)?;

        // Write to a sibling temp file first so a crash never leaves half a blob behind
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        std::fs::write(&tmp, blob).map_err(to_err)?;
        std::fs::rename(&tmp, &path).map_err(to_err)?;
        Ok(())
    }
}

/// In-process backend, used by tests
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(key).cloned())
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(key.to_string(), blob.to_string());
        Ok(())
    }
}

impl<T: StorageBackend + Sync> StorageBackend for std::sync::Arc<T> {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        (**self).write(key, blob)
    }
}

/// Serialized shape of the whole store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default = "legacy_version")]
    version: u32,
    #[serde(default)]
    sessions: HashMap<String, Session>,
}

fn legacy_version() -> u32 {
    1
}

/// Every session this client knows about, keyed by id.
///
/// The store is the single owner of session data; everything else refers to sessions by id.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    backend: Box<dyn StorageBackend>,
}

impl SessionStore {
    const CURRENT_VERSION: u32 = 1;

    /// Load the store, falling back to seed content when nothing has been saved yet
    pub fn load(backend: Box<dyn StorageBackend>) -> Result<Self, StoreError> {
        let sessions = match backend.read(SESSIONS_KEY)? {
            Some(blob) => match serde_json::from_str::<StoreFile>(&blob) {
                Ok(file) => {
                    tracing::debug!(
                        version = file.version,
                        sessions = file.sessions.len(),
                        "loaded session store"
                    );
                    file.sessions
                }
                Err(e) => {
                    tracing::warn!("session store unreadable, starting from seed content: {}", e);
                    // Keep the unreadable blob around instead of silently overwriting it
                    let backup_key = format!("{}.corrupt", SESSIONS_KEY);
                    if let Err(e) = backend.write(&backup_key, &blob) {
                        tracing::warn!("failed to back up unreadable store: {}", e);
                    }
                    seed_sessions()
                }
            },
            None => {
                tracing::info!("no saved sessions, seeding demo conversation");
                seed_sessions()
            }
        };

        Ok(Self { sessions, backend })
    }

    /// Serialize every session, replacing whatever was saved before
    pub fn save(&self) -> Result<(), StoreError> {
        let file = StoreFileRef {
            version: Self::CURRENT_VERSION,
            sessions: &self.sessions,
        };
        let blob = serde_json::to_string_pretty(&file)?;
        self.backend.write(SESSIONS_KEY, &blob)
    }

    /// Id of the session that was active when the store was last saved
    pub fn load_active_id(&self) -> Option<String> {
        match self.backend.read(ACTIVE_SESSION_KEY) {
            Ok(Some(blob)) => serde_json::from_str::<Option<String>>(&blob).ok().flatten(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("failed to read active session id: {}", e);
                None
            }
        }
    }

    pub fn save_active_id(&self, id: &str) -> Result<(), StoreError> {
        let blob = serde_json::to_string(id)?;
        self.backend.write(ACTIVE_SESSION_KEY, &blob)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Insert a session; an existing entry with the same id is replaced
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions ordered for display: most recently updated first
    pub fn sorted(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Resolve a full id or a unique id prefix
    pub fn resolve_id(&self, id_or_prefix: &str) -> Option<String> {
        if self.sessions.contains_key(id_or_prefix) {
            return Some(id_or_prefix.to_string());
        }
        if id_or_prefix.is_empty() {
            return None;
        }
        let mut matches = self.sessions.keys().filter(|k| k.starts_with(id_or_prefix));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first.clone())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    sessions: &'a HashMap<String, Session>,
}

/// Demo conversation shown on first run so the sidebar is never empty
fn seed_sessions() -> HashMap<String, Session> {
    let mut session = Session::new();
    session.record_user_turn("What can you help me with?");
    session.push_turn(Turn::assistant(
        "I can answer questions about:\n\
         - **Academic policies** such as assessment, resits and extenuating circumstances\n\
         - **Canvas** and submitting coursework\n\
         - **Student services** and who to contact\n\
         Ask me anything, and I will point you to the official source.",
        vec![
            "[Programme Handbook](https://example.edu/handbook)".to_string(),
            "Student Services FAQ".to_string(),
        ],
        None,
    ));

    let mut sessions = HashMap::new();
    sessions.insert(session.id.clone(), session);
    sessions
}
