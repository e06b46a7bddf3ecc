use std::env;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use facegate_config::Strategy;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::faces::enrollment::Template;
use crate::identity::IdentityId;

pub const TEMPLATE_KEY_ENV: &str = "FACEGATE_TEMPLATE_KEY";
pub const TEMPLATE_KEY_LEN: usize = 32;
const STORE_VERSION: u32 = 1;
const STORE_ALGORITHM: &str = "AES-256-GCM";
const STORE_NONCE_LEN: usize = 12;

/// One identity's template as handed to the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledTemplate {
    pub identity: IdentityId,
    pub template: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTemplate {
    pub identity: IdentityId,
    pub template: Vec<f64>,
    pub dimension: usize,
    pub strategy: Strategy,
    pub sample_count: usize,
    pub enrolled_at: DateTime<Utc>,
}

impl StoredTemplate {
    fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            identity: self.identity.clone(),
            dimension: self.dimension,
            strategy: self.strategy,
            sample_count: self.sample_count,
            enrolled_at: self.enrolled_at,
        }
    }
}

/// Template metadata without the vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
    pub identity: IdentityId,
    pub dimension: usize,
    pub strategy: Strategy,
    pub sample_count: usize,
    pub enrolled_at: DateTime<Utc>,
}

/// Durable identity → template mapping.
///
/// `get_all` returns an owned snapshot; `upsert` replaces an identity's
/// template wholesale and never exposes a half-written state to readers.
pub trait TemplateStore {
    fn get_all(&self) -> AppResult<Vec<EnrolledTemplate>>;

    fn upsert(&self, identity: &IdentityId, template: &Template) -> AppResult<()>;

    fn exists(&self, identity: &IdentityId) -> AppResult<bool>;

    /// Returns whether a template was removed.
    fn remove(&self, identity: &IdentityId) -> AppResult<bool>;

    fn list(&self) -> AppResult<Vec<TemplateSummary>>;
}

/// AES-256-GCM key for at-rest template encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct TemplateKey([u8; TEMPLATE_KEY_LEN]);

impl std::fmt::Debug for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TemplateKey(..)")
    }
}

impl TemplateKey {
    pub fn new(bytes: [u8; TEMPLATE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; TEMPLATE_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> AppResult<Self> {
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|err| AppError::InvalidStoreKey(format!("invalid base64: {err}")))?;
        let bytes: [u8; TEMPLATE_KEY_LEN] = decoded.try_into().map_err(|raw: Vec<u8>| {
            AppError::InvalidStoreKey(format!(
                "expected {TEMPLATE_KEY_LEN} bytes but found {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Reads `FACEGATE_TEMPLATE_KEY`; `None` when unset or blank.
    pub fn from_env() -> AppResult<Option<Self>> {
        match env::var(TEMPLATE_KEY_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::from_base64(&value).map(Some),
            _ => Ok(None),
        }
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Source of the at-rest key, swapped out by tests and embedding hosts.
pub trait KeyProvider {
    fn template_key(&self) -> AppResult<Option<TemplateKey>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvKeyProvider;

impl KeyProvider for EnvKeyProvider {
    fn template_key(&self) -> AppResult<Option<TemplateKey>> {
        TemplateKey::from_env()
    }
}

/// JSON file store, optionally encrypted at rest.
#[derive(Debug)]
pub struct FilesystemTemplateStore {
    path: PathBuf,
    strategy: Strategy,
    key: Option<TemplateKey>,
    lock: RwLock<()>,
}

impl FilesystemTemplateStore {
    pub fn new(path: impl Into<PathBuf>, strategy: Strategy) -> Self {
        Self {
            path: path.into(),
            strategy,
            key: None,
            lock: RwLock::new(()),
        }
    }

    pub fn with_key(mut self, key: Option<TemplateKey>) -> Self {
        self.key = key;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    fn read_guard(&self) -> AppResult<RwLockReadGuard<'_, ()>> {
        self.lock
            .read()
            .map_err(|_| AppError::StatePoisoned("template store"))
    }

    fn write_guard(&self) -> AppResult<RwLockWriteGuard<'_, ()>> {
        self.lock
            .write()
            .map_err(|_| AppError::StatePoisoned("template store"))
    }

    fn load(&self) -> AppResult<Vec<StoredTemplate>> {
        let records = read_template_file(&self.path, self.key.as_ref())?;
        for record in &records {
            if record.strategy != self.strategy {
                return Err(AppError::InvalidTemplateStore {
                    path: self.path.clone(),
                    message: format!(
                        "template for '{}' was enrolled with the {} strategy, expected {}",
                        record.identity, record.strategy, self.strategy
                    ),
                });
            }
            if record.template.len() != record.dimension {
                return Err(AppError::InvalidTemplateStore {
                    path: self.path.clone(),
                    message: format!(
                        "template for '{}' declares {} values but holds {}",
                        record.identity,
                        record.dimension,
                        record.template.len()
                    ),
                });
            }
        }
        Ok(records)
    }
}

impl TemplateStore for FilesystemTemplateStore {
    fn get_all(&self) -> AppResult<Vec<EnrolledTemplate>> {
        let _guard = self.read_guard()?;
        Ok(self
            .load()?
            .into_iter()
            .map(|record| EnrolledTemplate {
                identity: record.identity,
                template: record.template,
            })
            .collect())
    }

    fn upsert(&self, identity: &IdentityId, template: &Template) -> AppResult<()> {
        let _guard = self.write_guard()?;
        let mut records = self.load()?;
        apply_upsert(&mut records, identity, template, self.strategy)?;
        write_template_file(&self.path, &records, self.key.as_ref())?;
        info!(
            identity = %identity,
            path = %self.path.display(),
            encrypted = self.key.is_some(),
            "template upserted"
        );
        Ok(())
    }

    fn exists(&self, identity: &IdentityId) -> AppResult<bool> {
        let _guard = self.read_guard()?;
        Ok(self
            .load()?
            .iter()
            .any(|record| &record.identity == identity))
    }

    fn remove(&self, identity: &IdentityId) -> AppResult<bool> {
        let _guard = self.write_guard()?;
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|record| &record.identity != identity);
        if records.len() == before {
            return Ok(false);
        }
        write_template_file(&self.path, &records, self.key.as_ref())?;
        info!(identity = %identity, path = %self.path.display(), "template removed");
        Ok(true)
    }

    fn list(&self) -> AppResult<Vec<TemplateSummary>> {
        let _guard = self.read_guard()?;
        Ok(self.load()?.iter().map(StoredTemplate::summary).collect())
    }
}

/// Process-local store for tests and embedding hosts that persist elsewhere.
#[derive(Debug)]
pub struct InMemoryTemplateStore {
    strategy: Strategy,
    records: RwLock<Vec<StoredTemplate>>,
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self::new(Strategy::default())
    }
}

impl InMemoryTemplateStore {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            records: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Vec<StoredTemplate>>> {
        self.records
            .read()
            .map_err(|_| AppError::StatePoisoned("template store"))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Vec<StoredTemplate>>> {
        self.records
            .write()
            .map_err(|_| AppError::StatePoisoned("template store"))
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get_all(&self) -> AppResult<Vec<EnrolledTemplate>> {
        Ok(self
            .read()?
            .iter()
            .map(|record| EnrolledTemplate {
                identity: record.identity.clone(),
                template: record.template.clone(),
            })
            .collect())
    }

    fn upsert(&self, identity: &IdentityId, template: &Template) -> AppResult<()> {
        let mut records = self.write()?;
        apply_upsert(&mut records, identity, template, self.strategy)
    }

    fn exists(&self, identity: &IdentityId) -> AppResult<bool> {
        Ok(self.read()?.iter().any(|record| &record.identity == identity))
    }

    fn remove(&self, identity: &IdentityId) -> AppResult<bool> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|record| &record.identity != identity);
        Ok(records.len() != before)
    }

    fn list(&self) -> AppResult<Vec<TemplateSummary>> {
        Ok(self.read()?.iter().map(StoredTemplate::summary).collect())
    }
}

/// Validates `template` against the records and replaces or appends in place,
/// so the scan order of existing identities is preserved.
fn apply_upsert(
    records: &mut Vec<StoredTemplate>,
    identity: &IdentityId,
    template: &Template,
    strategy: Strategy,
) -> AppResult<()> {
    validate_template(identity, template)?;

    if let Some(other) = records.iter().find(|record| &record.identity != identity) {
        if other.dimension != template.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: other.dimension,
                found: template.dimension(),
            });
        }
    }

    let record = StoredTemplate {
        identity: identity.clone(),
        template: template.values().to_vec(),
        dimension: template.dimension(),
        strategy,
        sample_count: template.sample_count(),
        enrolled_at: Utc::now(),
    };

    match records.iter_mut().find(|existing| &existing.identity == identity) {
        Some(existing) => {
            debug!(identity = %identity, "replacing existing template");
            *existing = record;
        }
        None => records.push(record),
    }
    Ok(())
}

fn validate_template(identity: &IdentityId, template: &Template) -> AppResult<()> {
    if template.values().is_empty() {
        return Err(AppError::InvalidTemplate {
            identity: identity.to_string(),
            message: "template has no values".into(),
        });
    }
    if template.values().iter().any(|value| !value.is_finite()) {
        return Err(AppError::InvalidTemplate {
            identity: identity.to_string(),
            message: "template contains non-finite values".into(),
        });
    }
    Ok(())
}

pub fn read_template_file(path: &Path, key: Option<&TemplateKey>) -> AppResult<Vec<StoredTemplate>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let data = fs::read(path).map_err(|source| AppError::TemplateRead {
        path: path.to_path_buf(),
        source,
    })?;

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    if let Ok(wrapper) = serde_json::from_slice::<EncryptedTemplateStore>(&data) {
        return decrypt_template_store(path, wrapper, key);
    }

    serde_json::from_slice(&data).map_err(|err| AppError::InvalidTemplateStore {
        path: path.to_path_buf(),
        message: format!("invalid template store contents: {err}"),
    })
}

pub fn write_template_file(
    path: &Path,
    records: &[StoredTemplate],
    key: Option<&TemplateKey>,
) -> AppResult<()> {
    let write_err = |source| AppError::TemplateWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|source| AppError::TemplateWrite {
        path: parent.to_path_buf(),
        source,
    })?;

    let serialized = match key {
        Some(key) => serialize_encrypted_store(records, key)?,
        None => serde_json::to_vec_pretty(records)?,
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(&serialized).map_err(write_err)?;
            writer.write_all(b"\n").map_err(write_err)?;
            writer.flush().map_err(write_err)?;
        }
        file.sync_all().map_err(write_err)?;
    }

    let file = tmp.persist(path).map_err(|err| write_err(err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata().map_err(write_err)?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms).map_err(write_err)?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}

fn serialize_encrypted_store(records: &[StoredTemplate], key: &TemplateKey) -> AppResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(records)?;
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let mut nonce = [0u8; STORE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to encrypt template store: {err}")))?;
    let wrapper = EncryptedTemplateStore {
        version: STORE_VERSION,
        algorithm: STORE_ALGORITHM.to_string(),
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_vec_pretty(&wrapper).map_err(AppError::from)
}

fn decrypt_template_store(
    path: &Path,
    wrapper: EncryptedTemplateStore,
    key: Option<&TemplateKey>,
) -> AppResult<Vec<StoredTemplate>> {
    if wrapper.algorithm != STORE_ALGORITHM {
        return Err(AppError::Encryption(format!(
            "unsupported template store algorithm '{}'",
            wrapper.algorithm
        )));
    }
    if wrapper.version != STORE_VERSION {
        return Err(AppError::Encryption(format!(
            "unsupported template store version {}",
            wrapper.version
        )));
    }

    let key = key.ok_or_else(|| AppError::EncryptedStoreRequiresKey {
        path: path.to_path_buf(),
    })?;

    let nonce_bytes = general_purpose::STANDARD
        .decode(wrapper.nonce.trim())
        .map_err(|err| AppError::Encryption(format!("invalid nonce encoding: {err}")))?;
    if nonce_bytes.len() != STORE_NONCE_LEN {
        return Err(AppError::Encryption(format!(
            "expected nonce of {} bytes but found {}",
            STORE_NONCE_LEN,
            nonce_bytes.len()
        )));
    }

    let ciphertext = general_purpose::STANDARD
        .decode(wrapper.ciphertext.trim())
        .map_err(|err| AppError::Encryption(format!("invalid ciphertext encoding: {err}")))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to decrypt template store: {err}")))?;

    serde_json::from_slice(&plaintext).map_err(|err| AppError::InvalidTemplateStore {
        path: path.to_path_buf(),
        message: format!("invalid decrypted template store contents: {err}"),
    })
}

#[derive(Serialize, Deserialize)]
struct EncryptedTemplateStore {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}
