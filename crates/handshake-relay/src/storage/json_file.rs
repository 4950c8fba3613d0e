//! JSON file store
//!
//! One pretty-printed JSON document per file, so the state stays
//! human-inspectable. Concurrency is handled at two levels:
//! - a process-local mutex serializes threads of this process
//! - an advisory `flock` on a sibling `<name>.lock` file serializes separate
//!   processes sharing the document
//!
//! `update` holds the exclusive lock from before the read until after the
//! write. New contents go to `<name>.tmp` and are renamed over the document,
//! so a failed write leaves the previous document in place. The lock lives on
//! its own file because the rename replaces the document's inode.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{decode_or_default, Store, StorageError};

/// Store backed by a single JSON file
pub struct JsonFileStore<S> {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
    guard: Mutex<()>,
    _state: PhantomData<fn() -> S>,
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("state"));
    name.push(suffix);
    path.with_file_name(name)
}

impl<S> JsonFileStore<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    /// Open the store, creating the directory and an empty document if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                info!("Created storage directory {:?}", parent);
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&serde_json::to_vec_pretty(&S::default())?)?;
                debug!("Initialized {:?}", path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let store = Self {
            lock_path: sibling(&path, ".lock"),
            tmp_path: sibling(&path, ".tmp"),
            path,
            guard: Mutex::new(()),
            _state: PhantomData,
        };
        store.open_lock_file()?;
        Ok(store)
    }

    fn open_lock_file(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
    }

    fn read_document(&self) -> Result<S, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(decode_or_default(&content, &self.path.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(S::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `body` beside the document, then rename it into place
    fn write_document(&self, body: &[u8]) -> io::Result<()> {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.tmp_path)?;

        let written = tmp.write_all(body).and_then(|_| tmp.sync_data());
        drop(tmp);

        match written.and_then(|_| fs::rename(&self.tmp_path, &self.path)) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&self.tmp_path);
                Err(e)
            }
        }
    }
}

impl<S> Store<S> for JsonFileStore<S>
where
    S: Serialize + DeserializeOwned + Default,
{
    fn read(&self) -> Result<S, StorageError> {
        let _guard = self.guard.lock();
        let _lock = FileLock::acquire(self.open_lock_file()?, LockMode::Shared)?;
        self.read_document()
    }

    fn update(&self, f: &mut dyn FnMut(&mut S)) -> Result<(), StorageError> {
        let _guard = self.guard.lock();
        let _lock = FileLock::acquire(self.open_lock_file()?, LockMode::Exclusive)?;

        let mut state = self.read_document()?;
        f(&mut state);
        let body = serde_json::to_vec_pretty(&state)?;
        self.write_document(&body)?;

        Ok(())
    }

    fn is_writable(&self) -> bool {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let dir_ok = fs::metadata(dir)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        let file_ok = fs::metadata(&self.path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(true);
        dir_ok && file_ok
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Clone, Copy, Debug)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock held until the guard (and its file) is dropped
struct FileLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl FileLock {
    #[cfg(unix)]
    fn acquire(file: File, mode: LockMode) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };

        loop {
            // SAFETY: the descriptor is owned by `file`, which the guard keeps open
            let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
            if rc == 0 {
                return Ok(Self { file });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    #[cfg(not(unix))]
    fn acquire(file: File, _mode: LockMode) -> io::Result<Self> {
        // Only the process-local mutex applies here
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: see `acquire`; closing the file would also release the lock
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
