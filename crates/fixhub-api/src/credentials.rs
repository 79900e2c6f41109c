//! Credential Holder and credential persistence.
//!
//! The holder is the only writer of the bearer credential. Every other
//! component reads presence through it or has requests decorated by
//! [`CredentialHolder::attach`].

use crate::error::{ApiError, ApiResult};
use fixhub_core::Credential;
use parking_lot::{Mutex, RwLock};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persistence backend for the credential.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Read the persisted credential, if any.
    fn load(&self) -> ApiResult<Option<Credential>>;
    /// Persist `credential`, replacing any previous one.
    fn save(&self, credential: &Credential) -> ApiResult<()>;
    /// Remove the persisted credential. Removing nothing is not an error.
    fn clear(&self) -> ApiResult<()>;
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> ApiResult<Option<Credential>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, credential: &Credential) -> ApiResult<()> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// JSON file holding `{ "token": ..., "username": ... }`.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> ApiResult<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ApiError::Store(format!("Failed to read {}: {e}", self.path.display())))?;
        let credential = serde_json::from_str(&content).map_err(|e| {
            ApiError::Store(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> ApiResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ApiError::Store(format!("Failed to create {}: {e}", parent.display())))?;
        }
        let content = serde_json::to_string(credential)
            .map_err(|e| ApiError::Store(format!("Failed to serialize credential: {e}")))?;
        std::fs::write(&self.path, content)
            .map_err(|e| ApiError::Store(format!("Failed to write {}: {e}", self.path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(&self.path, perms) {
                warn!(path = %self.path.display(), error = %e, "Failed to restrict credential file permissions");
            }
        }

        Ok(())
    }

    fn clear(&self) -> ApiResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Store(format!(
                "Failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Owner of the current bearer credential.
///
/// Cheap to clone; clones share the same credential slot.
#[derive(Clone)]
pub struct CredentialHolder {
    current: Arc<RwLock<Slot>>,
    store: Arc<dyn CredentialStore>,
}

/// The held credential and the generation it was stored under.
///
/// The generation changes on every set and every logout, so a rejection can
/// be matched to the exact credential it was issued against.
#[derive(Default)]
struct Slot {
    credential: Option<Credential>,
    generation: u64,
}

impl Slot {
    fn replace(&mut self, credential: Option<Credential>) -> Option<Credential> {
        self.generation += 1;
        std::mem::replace(&mut self.credential, credential)
    }
}

impl CredentialHolder {
    /// Create a holder backed by `store`, restoring any persisted credential.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let restored = match store.load() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable persisted credential");
                None
            }
        };
        if let Some(credential) = &restored {
            info!(username = %credential.username(), "Restored persisted credential");
        }
        Self {
            current: Arc::new(RwLock::new(Slot {
                credential: restored,
                generation: 1,
            })),
            store,
        }
    }

    /// Holder with nothing persisted across restarts.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()))
    }

    /// Current credential, if one is held.
    pub fn current(&self) -> Option<Credential> {
        self.current.read().credential.clone()
    }

    pub fn is_present(&self) -> bool {
        self.current.read().credential.is_some()
    }

    /// Generation of the held credential; changes on every set and logout.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Display identity of the logged-in operator.
    pub fn username(&self) -> Option<String> {
        self.current
            .read()
            .credential
            .as_ref()
            .map(|c| c.username().to_string())
    }

    /// Store a freshly issued credential (write-through to the store).
    pub(crate) fn set(&self, credential: Credential) {
        if let Err(e) = self.store.save(&credential) {
            warn!(error = %e, "Failed to persist credential, keeping it for this process only");
        }
        self.current.write().replace(Some(credential));
    }

    /// Drop the credential unconditionally. Idempotent.
    pub fn logout(&self) {
        let had_credential = self.current.write().replace(None).is_some();
        self.cleared(had_credential);
    }

    /// Drop the credential only if it is still the one stored under
    /// `generation`. Returns whether it was dropped.
    pub fn logout_if_current(&self, generation: u64) -> bool {
        {
            let mut slot = self.current.write();
            if slot.generation != generation || slot.credential.is_none() {
                debug!(
                    generation,
                    current = slot.generation,
                    "Ignoring rejection of a replaced credential"
                );
                return false;
            }
            slot.replace(None);
        }
        self.cleared(true);
        true
    }

    fn cleared(&self, had_credential: bool) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted credential");
        }
        if had_credential {
            info!("Credential cleared");
        }
    }

    /// Add the bearer header to `request` if a credential is held.
    pub fn attach(&self, request: RequestBuilder) -> RequestBuilder {
        self.attach_tagged(request).0
    }

    /// Like [`attach`](Self::attach), also returning the generation of the
    /// credential that was attached.
    pub(crate) fn attach_tagged(&self, request: RequestBuilder) -> (RequestBuilder, Option<u64>) {
        let slot = self.current.read();
        match slot.credential.as_ref() {
            Some(credential) => (
                request.header(AUTHORIZATION, credential.bearer()),
                Some(slot.generation),
            ),
            None => {
                debug!("No credential held, sending request unauthenticated");
                (request, None)
            }
        }
    }
}
