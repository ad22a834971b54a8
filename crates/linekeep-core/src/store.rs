//! Line-oriented file store with external-change tracking.
//!
//! `FileStore` owns the one `ChangeWatcher` of its instance and the version
//! token of the tracked file. Saves run as a single critical section under the
//! watcher lock: suppress events, write, arm the delayed resume, record the new
//! token. The token is the file's modification time, so `needs_sync` is only as
//! precise as the filesystem's timestamp resolution.

use crate::codec::{CryptoCodec, Password};
use crate::error::{Result, StoreError};
use crate::host::{ChangeCallback, LoginFlow, StorageAccess};
use crate::settings::StoreSettings;
use crate::watcher::ChangeWatcher;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Directory path that additionally lists the external storage root.
pub const ROOT_SENTINEL: &str = "/";

/// Last known modification signature of the tracked file. Empty means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn unknown() -> Self {
        Self(String::new())
    }

    pub fn from_modified(modified: SystemTime) -> Self {
        let at: DateTime<Utc> = modified.into();
        Self(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::from_modified(fs::metadata(path)?.modified()?))
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub is_directory: bool,
}

pub struct FileStore {
    settings: StoreSettings,
    codec: CryptoCodec,
    access: Arc<dyn StorageAccess>,
    watcher: Mutex<ChangeWatcher>,
    version: Mutex<VersionToken>,
}

impl FileStore {
    pub fn new(
        settings: StoreSettings,
        access: Arc<dyn StorageAccess>,
        on_change: ChangeCallback,
    ) -> Result<Self> {
        settings.validate()?;
        let codec = CryptoCodec::new(
            settings.encryption.enabled,
            &settings.encryption.suffix,
            settings.encryption.kdf,
        );
        let watcher = ChangeWatcher::new(on_change)?;
        Ok(Self {
            settings,
            codec,
            access,
            watcher: Mutex::new(watcher),
            version: Mutex::new(VersionToken::unknown()),
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn codec(&self) -> &CryptoCodec {
        &self.codec
    }

    pub fn is_authorized(&self) -> bool {
        self.access.is_authorized()
    }

    pub fn login_flow(&self) -> Option<LoginFlow> {
        Some(LoginFlow::StoragePermission)
    }

    pub fn default_file(&self) -> Result<PathBuf> {
        Ok(self
            .settings
            .storage_root()?
            .join(&self.settings.default_file_name))
    }

    pub fn version(&self) -> VersionToken {
        self.version.lock().clone()
    }

    pub fn watched_path(&self) -> Option<PathBuf> {
        self.watcher.lock().watched_path()
    }

    /// Reads `path` as lines, decrypting eligible files, and starts tracking it.
    pub fn load(&self, path: &Path, password: Option<&Password>) -> Result<Vec<String>> {
        info!(path = %path.display(), "loading lines");
        let content = self.read_content(path, password)?;
        let lines: Vec<String> = content.lines().map(str::to_owned).collect();
        info!(path = %path.display(), lines = lines.len(), "read lines");

        self.watcher.lock().replace(path)?;
        let token = VersionToken::of_file(path).map_err(|e| StoreError::io(path, e))?;
        *self.version.lock() = token;
        Ok(lines)
    }

    /// Whole file content with lines joined by `\n`. Does not touch the
    /// watcher or the version token.
    pub fn read_file(&self, path: &Path, password: Option<&Password>) -> Result<String> {
        info!(path = %path.display(), "reading file");
        let content = self.read_content(path, password)?;
        Ok(content.lines().collect::<Vec<_>>().join("\n"))
    }

    /// True when the file's modification signature differs from the last one
    /// seen by `load` or `save`. Unreadable metadata counts as changed.
    pub fn needs_sync(&self, path: &Path) -> bool {
        let known = self.version.lock().clone();
        if known.is_unknown() {
            return true;
        }
        match VersionToken::of_file(path) {
            Ok(current) => current != known,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read modification time");
                true
            }
        }
    }

    /// Writes `lines` joined by `eol`, encrypting eligible paths. The store's
    /// own write is kept from reaching the change callback.
    pub fn save(
        &self,
        path: &Path,
        lines: &[String],
        eol: &str,
        password: Option<&Password>,
    ) -> Result<PathBuf> {
        info!(path = %path.display(), lines = lines.len(), "saving lines");
        let bytes = self.encode_for(path, &lines.join(eol), password)?;

        let watcher = self.watcher.lock();
        watcher.suppress();
        let written = write_atomic(path, &bytes);
        watcher.resume_after(self.settings.resume_delay());
        written?;

        *self.version.lock() = token_after_write(path);
        drop(watcher);
        Ok(path.to_path_buf())
    }

    /// Writes a raw string through the same encode and atomic-write path as
    /// `save`, without suppressing the watcher or updating the token.
    pub fn write_file(&self, path: &Path, contents: &str, password: Option<&Password>) -> Result<()> {
        info!(path = %path.display(), "writing file");
        let bytes = self.encode_for(path, contents, password)?;
        write_atomic(path, &bytes)
    }

    /// Appends `lines` as plaintext. Encryption-eligible files are not
    /// encrypted on this path.
    pub fn append(&self, path: &Path, lines: &[String], eol: &str) -> Result<()> {
        info!(path = %path.display(), lines = lines.len(), "appending lines");
        if lines.is_empty() {
            return Ok(());
        }
        if self.codec.is_eligible(path) {
            warn!(path = %path.display(), "appending plaintext to an encrypted file");
        }
        let io = |e| StoreError::io(path, e);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(io)?;

        let mut text = String::new();
        if !ends_with_eol(&mut file, eol).map_err(io)? {
            text.push_str(eol);
        }
        text.push_str(&lines.join(eol));
        file.write_all(text.as_bytes()).map_err(io)?;
        file.sync_all().map_err(io)
    }

    /// Forgets the version token, e.g. when the tracked file is retargeted.
    pub fn invalidate(&self) {
        debug!("version token invalidated");
        *self.version.lock() = VersionToken::unknown();
    }

    /// Readable immediate children of `dir`, sorted by name. With `txt_only`,
    /// plain files must end in `.txt`; directories are always listed. Special
    /// files and entries that cannot be opened are skipped.
    pub fn list_entries(&self, dir: &Path, txt_only: bool) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        if dir == Path::new(ROOT_SENTINEL) {
            entries.push(FileEntry {
                path: self.settings.storage_root()?,
                is_directory: true,
            });
        }
        let read = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut children: Vec<FileEntry> = read
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| scan_entry(&entry.path(), txt_only))
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        entries.extend(children);
        Ok(entries)
    }

    pub fn stop_watching(&self) {
        self.watcher.lock().stop();
    }

    fn read_content(&self, path: &Path, password: Option<&Password>) -> Result<String> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        if self.codec.is_eligible(path) {
            let password = require_password(password)?;
            return self.codec.decode(&bytes, password);
        }
        String::from_utf8(bytes).map_err(|e| {
            StoreError::io(path, std::io::Error::new(ErrorKind::InvalidData, e))
        })
    }

    fn encode_for(&self, path: &Path, content: &str, password: Option<&Password>) -> Result<Vec<u8>> {
        if !self.codec.is_eligible(path) {
            return Ok(content.as_bytes().to_vec());
        }
        let password = require_password(password)?;
        self.codec.encode(content, password)
    }
}

fn require_password(password: Option<&Password>) -> Result<&Password> {
    match password {
        Some(pw) if !pw.is_empty() => Ok(pw),
        _ => {
            warn!("no password for encrypted file");
            Err(StoreError::Encryption("no password".into()))
        }
    }
}

/// An unreadable modification time after a completed write leaves the token
/// unknown so the next `needs_sync` forces a reload.
fn token_after_write(path: &Path) -> VersionToken {
    VersionToken::of_file(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "saved but modification time unreadable");
        VersionToken::unknown()
    })
}

fn ends_with_eol(file: &mut File, eol: &str) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 || eol.is_empty() {
        return Ok(true);
    }
    if len < eol.len() as u64 {
        return Ok(false);
    }
    let mut tail = vec![0u8; eol.len()];
    file.seek(SeekFrom::End(-(eol.len() as i64)))?;
    file.read_exact(&mut tail)?;
    Ok(tail == eol.as_bytes())
}

/// Writes `bytes` to a staging file next to `path` and renames it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io = |e| StoreError::io(&target, e);

    let mut staging = tempfile::Builder::new()
        .prefix(".linekeep_")
        .tempfile_in(&parent)
        .map_err(io)?;
    staging.write_all(bytes).map_err(io)?;
    staging.as_file().sync_all().map_err(io)?;
    if let Ok(meta) = fs::metadata(&target) {
        staging
            .as_file()
            .set_permissions(meta.permissions())
            .map_err(io)?;
    }
    staging.persist(&target).map_err(|e| io(e.error))?;

    #[cfg(unix)]
    {
        if let Ok(dir) = File::open(&parent) {
            let _ = dir.sync_all();
        }
    }
    debug!(path = %target.display(), bytes = bytes.len(), "file written");
    Ok(())
}

fn scan_entry(path: &Path, txt_only: bool) -> Option<FileEntry> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let meta = fs::metadata(path).ok()?;
    if meta.is_dir() {
        fs::read_dir(path).ok()?;
        return Some(FileEntry {
            path: PathBuf::from(name),
            is_directory: true,
        });
    }
    // Pipes and devices can block on open.
    if !meta.is_file() {
        return None;
    }
    File::open(path).ok()?;
    if txt_only && !name.to_lowercase().ends_with(".txt") {
        return None;
    }
    Some(FileEntry {
        path: PathBuf::from(name),
        is_directory: false,
    })
}
