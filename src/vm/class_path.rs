use crate::vm::error::VmError;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// Maps an internal class name (`java/lang/Object`) to class-file bytes.
pub trait ClassPath: Send + Sync {
    fn find_class(&self, name: &str) -> Result<Vec<u8>, VmError>;
}

fn class_file(name: &str) -> String {
    format!("{}.class", name)
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("jar") || e.eq_ignore_ascii_case("zip"))
}

/// A directory holding `<name>.class` files.
pub struct DirectoryClassPath {
    root: PathBuf,
}

impl DirectoryClassPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryClassPath { root: root.into() }
    }
}

impl ClassPath for DirectoryClassPath {
    fn find_class(&self, name: &str) -> Result<Vec<u8>, VmError> {
        let path = self.root.join(class_file(name));
        match fs::read(&path) {
            Ok(bytes) => {
                trace!("Read {} bytes from {:?}", bytes.len(), path);
                Ok(bytes)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(VmError::ClassNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// A jar or zip archive, opened once and read under a lock.
pub struct ArchiveClassPath {
    path: PathBuf,
    archive: Mutex<ZipArchive<File>>,
}

fn archive_error(path: &Path, err: ZipError) -> VmError {
    match err {
        ZipError::Io(err) => VmError::Io(err),
        other => VmError::malformed(format!("archive {}: {}", path.display(), other)),
    }
}

impl ArchiveClassPath {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VmError> {
        let path = path.into();
        let archive = ZipArchive::new(File::open(&path)?).map_err(|err| archive_error(&path, err))?;
        debug!("Opened {:?} with {} entries", path, archive.len());
        Ok(ArchiveClassPath {
            path,
            archive: Mutex::new(archive),
        })
    }
}

impl ClassPath for ArchiveClassPath {
    fn find_class(&self, name: &str) -> Result<Vec<u8>, VmError> {
        let mut archive = self.archive.lock();
        let mut entry = match archive.by_name(&class_file(name)) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(VmError::ClassNotFound(name.to_string())),
            Err(err) => return Err(archive_error(&self.path, err)),
        };
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        trace!("Read {} bytes of {} from {:?}", bytes.len(), name, self.path);
        Ok(bytes)
    }
}

/// `dir/*` stands for the archives directly inside `dir`, in name order.
fn expand(entry: &Path) -> Vec<PathBuf> {
    if entry.file_name() != Some(OsStr::new("*")) {
        return vec![entry.to_path_buf()];
    }
    let dir = entry
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match fs::read_dir(dir) {
        Ok(listing) => {
            let mut archives: Vec<PathBuf> = listing
                .filter_map(|item| item.ok())
                .map(|item| item.path())
                .filter(|path| path.is_file() && is_archive(path))
                .collect();
            archives.sort();
            archives
        }
        Err(err) => {
            warn!("Cannot expand classpath entry {:?}: {}", entry, err);
            Vec::new()
        }
    }
}

/// Ordered classpath; the first entry holding a class wins.
pub struct SearchPath {
    entries: Vec<Box<dyn ClassPath>>,
}

impl SearchPath {
    /// Entries are directories, jar/zip archives or `dir/*` wildcards.
    /// Archives that cannot be opened are skipped with a warning.
    pub fn new<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut resolved: Vec<Box<dyn ClassPath>> = Vec::new();
        for entry in entries.into_iter().map(Into::into) {
            for path in expand(&entry) {
                if !is_archive(&path) {
                    resolved.push(Box::new(DirectoryClassPath::new(path)));
                    continue;
                }
                match ArchiveClassPath::open(&path) {
                    Ok(archive) => resolved.push(Box::new(archive)),
                    Err(err) => warn!("Skipping classpath entry {:?}: {}", path, err),
                }
            }
        }
        SearchPath { entries: resolved }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClassPath for SearchPath {
    fn find_class(&self, name: &str) -> Result<Vec<u8>, VmError> {
        for entry in &self.entries {
            match entry.find_class(name) {
                Err(VmError::ClassNotFound(_)) => continue,
                found => return found,
            }
        }
        Err(VmError::ClassNotFound(name.to_string()))
    }
}

/// Class bytes held in memory, for hosts that generate or embed classes.
#[derive(Default)]
pub struct MemoryClassPath {
    classes: HashMap<String, Vec<u8>>,
}

impl MemoryClassPath {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.classes.insert(name.to_string(), bytes);
    }
}

impl ClassPath for MemoryClassPath {
    fn find_class(&self, name: &str) -> Result<Vec<u8>, VmError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::ClassNotFound(name.to_string()))
    }
}
