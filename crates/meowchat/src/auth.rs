//! Account storage behind the login and registration prompts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

/// Credential store consulted by the session state machine.
///
/// Implementations are called from async tasks but may block briefly (hashing, small file
/// writes).
pub trait AuthStore: Send + Sync {
    fn exists(&self, username: &str) -> anyhow::Result<bool>;

    fn verify(&self, username: &str, password: &str) -> anyhow::Result<bool>;

    /// Create an account. `Ok(false)` if the name is already taken.
    fn create(&self, username: &str, password: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRec {
    name: String,
    pw_hash: String,
    created_unix: u64,
}

/// Accounts kept in one JSON file of Argon2 PHC hashes (never raw passwords).
#[derive(Debug)]
pub struct AccountsFile {
    path: PathBuf,
    by_name: Mutex<HashMap<String, AccountRec>>,
}

impl AccountsFile {
    /// Load accounts from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut by_name = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(s) => {
                let v: Vec<AccountRec> = serde_json::from_str(&s).map_err(|e| {
                    anyhow::anyhow!("failed to parse accounts file {:?}: {e}", path)
                })?;
                for a in v {
                    by_name.insert(a.name.clone(), a);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read accounts file {:?}: {e}",
                    path
                ));
            }
        }
        Ok(Self {
            path,
            by_name: Mutex::new(by_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AccountRec>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.by_name.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, by_name: &HashMap<String, AccountRec>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("failed to create accounts dir {:?}: {e}", parent)
                })?;
            }
        }

        let mut v = by_name.values().cloned().collect::<Vec<_>>();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        let s = serde_json::to_string_pretty(&v)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AuthStore for AccountsFile {
    fn exists(&self, username: &str) -> anyhow::Result<bool> {
        Ok(self.lock().contains_key(username))
    }

    fn verify(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        let hash = match self.lock().get(username) {
            Some(r) => r.pw_hash.clone(),
            None => return Ok(false),
        };
        let Ok(ph) = PasswordHash::new(&hash) else {
            return Ok(false);
        };
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &ph)
            .is_ok())
    }

    fn create(&self, username: &str, password: &str) -> anyhow::Result<bool> {
        if self.lock().contains_key(username) {
            return Ok(false);
        }

        // Hash outside the lock; re-check the name before inserting.
        let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
        let pw_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("hash_password failed: {e}"))?
            .to_string();
        let created_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut m = self.lock();
        if m.contains_key(username) {
            return Ok(false);
        }
        m.insert(
            username.to_string(),
            AccountRec {
                name: username.to_string(),
                pw_hash,
                created_unix,
            },
        );
        if let Err(e) = self.save(&m) {
            m.remove(username);
            return Err(e);
        }
        Ok(true)
    }
}
