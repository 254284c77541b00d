//! Shared byte-level access to entries of zip archives (jars).
//!
//! [`ArchiveStore`] memoizes one [`ArchiveHandle`] per canonical archive path.
//! The registry lock only guards the path -> cell map; opening a handle
//! happens inside the per-path cell, so callers working on different
//! archives never wait on each other and a first-access race opens the
//! archive exactly once.
//!
//! A handle reads through a memory map of the archive and stages writes in
//! memory. Closing a handle with staged writes rewrites the archive next to
//! the original (untouched entries are raw copied, replaced entries keep
//! their position) and renames it over the original.

use memmap2::Mmap;
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),
    #[error("entry {entry} not found in {}", .archive.display())]
    EntryNotFound { archive: PathBuf, entry: String },
    #[error("archive {} is closed", .0.display())]
    Closed(PathBuf),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid zip structure in {}: {source}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

impl ArchiveError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn zip(path: &Path, source: ZipError) -> Self {
        match source {
            ZipError::Io(source) => ArchiveError::io(path, source),
            source => ArchiveError::Zip {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

#[derive(Debug)]
pub struct CloseFailure {
    pub path: PathBuf,
    pub error: ArchiveError,
}

/// Every handle that failed to close during [`ArchiveStore::close_all`].
#[derive(Debug, Error)]
#[error("failed to close {} archive(s): {}", .failures.len(), describe(.failures))]
pub struct CloseAllError {
    pub failures: Vec<CloseFailure>,
}

fn describe(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(|f| f.error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

type HandleCell = Arc<OnceCell<Arc<ArchiveHandle>>>;

#[derive(Default)]
pub struct ArchiveStore {
    handles: Mutex<HashMap<PathBuf, HandleCell>>,
}

impl ArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, archive: &Path, entry: &str) -> Result<Vec<u8>, ArchiveError> {
        self.handle(archive)?.read(entry)
    }

    pub fn write(&self, archive: &Path, entry: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.handle(archive)?.write(entry, bytes)
    }

    /// Returns the live handle for `archive`, opening it on first use.
    pub fn handle(&self, archive: &Path) -> Result<Arc<ArchiveHandle>, ArchiveError> {
        let key = registry_key(archive)?;
        let cell = {
            let mut handles = self.registry();
            Arc::clone(handles.entry(key.clone()).or_default())
        };
        cell.get_or_try_init(|| ArchiveHandle::open(key).map(Arc::new))
            .cloned()
    }

    pub fn open_handles(&self) -> usize {
        self.registry()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// Closes every cached handle, attempting all of them even when some fail.
    pub fn close_all(&self) -> Result<(), CloseAllError> {
        let mut drained: Vec<(PathBuf, HandleCell)> = self.registry().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failures = Vec::new();
        for (path, cell) in drained {
            let Some(handle) = cell.get() else {
                continue;
            };
            match handle.close() {
                Ok(()) => log::debug!("Closed archive {}", path.display()),
                Err(error) => failures.push(CloseFailure { path, error }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseAllError { failures })
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, HandleCell>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ArchiveStore {
    fn drop(&mut self) {
        if let Err(err) = self.close_all() {
            for failure in &err.failures {
                log::warn!(
                    "Failed to close archive {}: {}",
                    failure.path.display(),
                    failure.error
                );
            }
        }
    }
}

/// An open archive. Entry reads and writes serialize on the handle's lock.
pub struct ArchiveHandle {
    path: PathBuf,
    state: Mutex<HandleState>,
}

struct HandleState {
    archive: Option<ZipArchive<Cursor<Mmap>>>,
    staged: BTreeMap<String, Vec<u8>>,
}

impl ArchiveHandle {
    fn open(path: PathBuf) -> Result<Self, ArchiveError> {
        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArchiveError::ArchiveNotFound(path.clone()),
            _ => ArchiveError::io(&path, e),
        })?;
        // SAFETY: The file is opened read-only and the map is only read
        // through the zip reader. The map is dropped before the archive is
        // replaced on close.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ArchiveError::io(&path, e))?;
        let archive =
            ZipArchive::new(Cursor::new(mmap)).map_err(|e| ArchiveError::zip(&path, e))?;

        log::debug!("Opened archive {} ({} entries)", path.display(), archive.len());
        Ok(Self {
            path,
            state: Mutex::new(HandleState {
                archive: Some(archive),
                staged: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, entry: &str) -> Result<Vec<u8>, ArchiveError> {
        let entry = normalize_entry(entry);
        let mut state = self.state();
        if let Some(bytes) = state.staged.get(entry) {
            return Ok(bytes.clone());
        }
        let archive = state
            .archive
            .as_mut()
            .ok_or_else(|| ArchiveError::Closed(self.path.clone()))?;

        let mut file = archive.by_name(entry).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::EntryNotFound {
                archive: self.path.clone(),
                entry: entry.to_string(),
            },
            e => ArchiveError::zip(&self.path, e),
        })?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(buf)
    }

    /// Creates or replaces `entry`. The new contents are visible to reads
    /// through this handle immediately and reach the file on close.
    pub fn write(&self, entry: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let mut state = self.state();
        if state.archive.is_none() {
            return Err(ArchiveError::Closed(self.path.clone()));
        }
        state
            .staged
            .insert(normalize_entry(entry).to_string(), bytes.to_vec());
        Ok(())
    }

    /// Releases the archive, flushing staged writes. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), ArchiveError> {
        let mut state = self.state();
        let Some(archive) = state.archive.take() else {
            return Ok(());
        };
        let staged = std::mem::take(&mut state.staged);
        if staged.is_empty() {
            return Ok(());
        }

        let tmp = temp_sibling(&self.path);
        let result = rewrite(archive, staged, &tmp)
            .and_then(|()| copy_permissions(&self.path, &tmp))
            .and_then(|()| {
                std::fs::rename(&tmp, &self.path).map_err(|e| ArchiveError::io(&self.path, e))
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn rewrite(
    mut archive: ZipArchive<Cursor<Mmap>>,
    mut staged: BTreeMap<String, Vec<u8>>,
    tmp: &Path,
) -> Result<(), ArchiveError> {
    let file = File::create(tmp).map_err(|e| ArchiveError::io(tmp, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let zip_err = |e| ArchiveError::zip(tmp, e);
    writer.set_raw_comment(archive.comment().to_vec());

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(zip_err)?;
        let Some(bytes) = staged.remove(entry.name()) else {
            writer.raw_copy_file(entry).map_err(zip_err)?;
            continue;
        };

        let method = match entry.compression() {
            CompressionMethod::Stored => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        };
        let mut options = FileOptions::default()
            .compression_method(method)
            .last_modified_time(entry.last_modified());
        if let Some(mode) = entry.unix_mode() {
            options = options.unix_permissions(mode);
        }
        let name = entry.name().to_string();
        drop(entry);

        writer.start_file(name, options).map_err(zip_err)?;
        writer
            .write_all(&bytes)
            .map_err(|e| ArchiveError::io(tmp, e))?;
    }

    for (name, bytes) in staged {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name, options).map_err(zip_err)?;
        writer
            .write_all(&bytes)
            .map_err(|e| ArchiveError::io(tmp, e))?;
    }

    let buffered = writer.finish().map_err(zip_err)?;
    let file = buffered
        .into_inner()
        .map_err(|e| ArchiveError::io(tmp, e.into_error()))?;
    file.sync_all().map_err(|e| ArchiveError::io(tmp, e))?;
    Ok(())
}

fn copy_permissions(from: &Path, to: &Path) -> Result<(), ArchiveError> {
    let permissions = std::fs::metadata(from)
        .map_err(|e| ArchiveError::io(from, e))?
        .permissions();
    std::fs::set_permissions(to, permissions).map_err(|e| ArchiveError::io(to, e))
}

/// Spellings of the same file (relative, `..`, symlinks) share one key. A
/// path that does not resolve keeps its absolute form so opening it reports
/// the archive as missing.
fn registry_key(archive: &Path) -> Result<PathBuf, ArchiveError> {
    match std::fs::canonicalize(archive) {
        Ok(path) => Ok(path),
        Err(_) => std::path::absolute(archive).map_err(|e| ArchiveError::io(archive, e)),
    }
}

fn normalize_entry(entry: &str) -> &str {
    entry.trim_start_matches('/')
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
