//! Persistent file primitive.
//!
//! The log store and the cursor file sit on a [`Volume`]: a flat namespace of
//! named files that can be appended to, read from an offset, and replaced.
//! [`DirVolume`] maps names into a directory; [`MemVolume`] keeps files in
//! memory for tests and dry runs.
//!
//! # Concurrency
//!
//! Not thread-safe. The store has a single writer and a single reader that
//! never run at the same time; callers that introduce a background upload
//! task must serialise access themselves.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Named-file storage.
pub trait Volume {
    /// Handle returned by [`Volume::open_append`].
    type Writer: Write;
    /// Handle returned by [`Volume::open_read`].
    type Reader: Read + Seek;

    /// Whether `name` exists.
    fn exists(&self, name: &str) -> bool;

    /// Open `name` for appending, creating it if missing.
    fn open_append(&self, name: &str) -> io::Result<Self::Writer>;

    /// Open `name` for reading from the start.
    fn open_read(&self, name: &str) -> io::Result<Self::Reader>;

    /// Current size of `name` in bytes.
    fn len(&self, name: &str) -> io::Result<u64>;

    /// Atomically replace the contents of `name`.
    fn replace(&self, name: &str, contents: &[u8]) -> io::Result<()>;

    /// Delete `name`. Missing files are not an error.
    fn remove(&self, name: &str) -> io::Result<()>;
}

/// Files under a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirVolume {
    root: PathBuf,
}

impl DirVolume {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Volume for DirVolume {
    type Writer = File;
    type Reader = File;

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn open_append(&self, name: &str) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
    }

    fn open_read(&self, name: &str) -> io::Result<File> {
        File::open(self.path(name))
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path(name))?.len())
    }

    fn replace(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let tmp = self.path(&format!("{name}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(tmp, self.path(name))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path(name)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

type Files = Rc<RefCell<HashMap<String, Vec<u8>>>>;

/// In-memory volume. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemVolume {
    files: Files,
    read_only: Rc<RefCell<bool>>,
}

impl MemVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a file's bytes.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }

    /// Append raw bytes, bypassing the store (e.g. a torn write).
    pub fn append_raw(&self, name: &str, bytes: &[u8]) {
        self.files
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(bytes);
    }

    /// Make every subsequent open/replace fail, as an unplugged card would.
    pub fn set_read_only(&self, read_only: bool) {
        *self.read_only.borrow_mut() = read_only;
    }

    fn check_writable(&self) -> io::Result<()> {
        if *self.read_only.borrow() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "volume is read-only",
            ));
        }
        Ok(())
    }
}

/// Appending handle into a [`MemVolume`] file.
#[derive(Debug)]
pub struct MemWriter {
    files: Files,
    name: String,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files
            .borrow_mut()
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Volume for MemVolume {
    type Writer = MemWriter;
    type Reader = Cursor<Vec<u8>>;

    fn exists(&self, name: &str) -> bool {
        self.files.borrow().contains_key(name)
    }

    fn open_append(&self, name: &str) -> io::Result<MemWriter> {
        self.check_writable()?;
        self.files.borrow_mut().entry(name.to_string()).or_default();
        Ok(MemWriter {
            files: Rc::clone(&self.files),
            name: name.to_string(),
        })
    }

    fn open_read(&self, name: &str) -> io::Result<Cursor<Vec<u8>>> {
        self.contents(name)
            .map(Cursor::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn len(&self, name: &str) -> io::Result<u64> {
        self.files
            .borrow()
            .get(name)
            .map(|f| f.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn replace(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.files
            .borrow_mut()
            .insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.check_writable()?;
        self.files.borrow_mut().remove(name);
        Ok(())
    }
}
