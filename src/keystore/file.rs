//! Key store persisted to a JSON file.

use async_trait::async_trait;
use dashmap::DashMap;
use fs4::fs_std::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::crypto::WrappedKey;
use crate::keystore::types::{KeyStore, PrincipalKeyRecord, StoreError};

/// Key store backed by a JSON array of [`PrincipalKeyRecord`]s.
///
/// The file is the source of truth and may be shared by several processes.
/// Inserts take an exclusive lock on a `<name>.lock` sibling, re-read the
/// file and decide presence from its contents, then rewrite it through a
/// temporary sibling and a rename. Readers never lock: the rename makes each
/// version of the file appear whole. Records seen once are kept in memory,
/// which is safe because a record is never overwritten.
pub struct FileKeyStore {
    path: Arc<PathBuf>,
    records: DashMap<String, WrappedKey>,
    writer: Mutex<()>,
}

impl FileKeyStore {
    /// Open the store, loading existing records if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let loaded = read_records(&path)?;

        if path.exists() {
            tracing::info!(path = %path.display(), records = loaded.len(), "Loaded key records");
        } else {
            tracing::info!(path = %path.display(), "Key record file not found, starting empty");
        }

        let store = Self {
            path: Arc::new(path),
            records: DashMap::new(),
            writer: Mutex::new(()),
        };
        store.remember(loaded);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records known to this instance.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn remember(&self, records: Vec<PrincipalKeyRecord>) {
        for record in records {
            self.records.entry(record.principal).or_insert(record.wrapped_key);
        }
    }

    /// Run blocking file work off the async workers.
    async fn blocking<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || work(&path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("key store task failed: {}", e)))?
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(OsString::new);
    name.push(suffix);
    path.with_file_name(name)
}

/// Parse the record file. A missing file is an empty store.
fn read_records(path: &Path) -> Result<Vec<PrincipalKeyRecord>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let records: Vec<PrincipalKeyRecord> = serde_json::from_reader(BufReader::new(file))?;

    let mut seen = std::collections::HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.principal.as_str()) {
            return Err(StoreError::Unavailable(format!(
                "duplicate record for principal '{}' in {}",
                record.principal,
                path.display()
            )));
        }
    }
    Ok(records)
}

/// Insert under the cross-process lock. Returns whether the record was
/// created and the records now on disk.
fn insert_locked(
    path: &Path,
    principal: &str,
    wrapped: &WrappedKey,
) -> Result<(bool, Vec<PrincipalKeyRecord>), StoreError> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, ".lock"))?;
    // Released when `lock` is dropped.
    lock.lock_exclusive()?;

    let mut records = read_records(path)?;
    if records.iter().any(|r| r.principal == principal) {
        return Ok((false, records));
    }

    records.push(PrincipalKeyRecord {
        principal: principal.to_string(),
        wrapped_key: wrapped.clone(),
    });
    records.sort_by(|a, b| a.principal.cmp(&b.principal));

    let tmp_path = sibling(path, ".tmp");
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&serde_json::to_vec_pretty(&records)?)?;
    tmp.sync_all()?;
    drop(tmp);
    fs::rename(&tmp_path, path)?;

    Ok((true, records))
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get_wrapped_key(&self, principal: &str) -> Result<Option<WrappedKey>, StoreError> {
        if let Some(found) = self.records.get(principal) {
            return Ok(Some(found.value().clone()));
        }

        // Another process may have written it since we last looked.
        let records = self.blocking(|path| read_records(path)).await?;
        self.remember(records);
        Ok(self.records.get(principal).map(|r| r.value().clone()))
    }

    async fn put_wrapped_key_if_absent(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<bool, StoreError> {
        let _writer = self.writer.lock().await;

        let owned_principal = principal.to_string();
        let owned_wrapped = wrapped.clone();
        let (created, records) = self
            .blocking(move |path| insert_locked(path, &owned_principal, &owned_wrapped))
            .await?;
        let total = records.len();
        self.remember(records);

        if created {
            tracing::debug!(principal = %principal, records = total, "Saved key record");
        } else {
            tracing::debug!(principal = %principal, "Key record already present on disk");
        }
        Ok(created)
    }
}

impl std::fmt::Debug for FileKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyStore")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .finish()
    }
}
