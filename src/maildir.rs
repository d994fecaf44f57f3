//! Maildir++ delivery.
//!
//! Messages are written to `tmp/` first and renamed into `new/`, so readers
//! scanning `new/` only ever see complete files. Subfolders live next to the
//! root's own `tmp`/`new` as `.<folder>` and carry an empty `maildirfolder`
//! marker.

use std::fs::{DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use log::debug;

use crate::error::Error::*;
use crate::error::*;

pub const FILE_PERMISSIONS: u32 = 0o660;
pub const DIRECTORY_PERMISSIONS: u32 = 0o770;

const FOLDER_MARKER: &str = "maildirfolder";

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// `<UTC timestamp>_<pid>_<sequence>.eml`, sortable by time
pub fn unique_filename() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!(
        "{}_{}_{}.eml",
        Utc::now().format("%Y%m%d_%H%M%S"),
        process::id(),
        seq
    )
}

/// Creates `dir` and its parents. A directory that already exists, maybe
/// because a concurrent delivery just created it, is fine.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIRECTORY_PERMISSIONS)
        .create(dir)?;
    Ok(())
}

/// Writes `data` into a new uniquely named file in `dir` and returns its path
pub fn write_email(dir: &Path, data: &[u8]) -> Result<PathBuf> {
    ensure_dir(dir)?;

    let path = dir.join(unique_filename());
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(FILE_PERMISSIONS)
        .open(&path)?;
    file.write_all(data)?;
    file.sync_all()?;

    Ok(path)
}

#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
}

impl Maildir {
    pub fn new<P>(root: &P) -> Self
    where
        P: AsRef<Path> + ?Sized,
    {
        Maildir {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory of `folder`, the root itself for the empty name. Names
    /// with a leading `.` would resolve to `..` or a nested dot directory.
    pub fn folder_path(&self, folder: &str) -> Result<PathBuf> {
        if folder.is_empty() {
            return Ok(self.root.clone());
        }
        if folder.starts_with('.') || folder.contains('/') || folder.contains('\0') {
            let e = format!("invalid folder name {:?}", folder);
            return Err(UnsupportedValue(e));
        }
        Ok(self.root.join(format!(".{}", folder)))
    }

    /// Stores `data` in `folder` and returns the path of the new file
    pub fn deliver(&self, folder: &str, data: &[u8]) -> Result<PathBuf> {
        let dest = self.folder_path(folder)?;

        let tmp = write_email(&dest.join("tmp"), data)?;

        let new_dir = dest.join("new");
        ensure_dir(&new_dir)?;

        // write_email always returns a file inside tmp/
        let filename = tmp
            .file_name()
            .ok_or_else(|| ProcessorError(format!("no file name in {}", tmp.display())))?;
        let target = new_dir.join(filename);
        std::fs::rename(&tmp, &target)?;
        debug!("Delivered {}", target.display());

        if !folder.is_empty() {
            mark_folder(&dest)?;
        }

        Ok(target)
    }
}

fn mark_folder(dest: &Path) -> Result<()> {
    let marker = dest.join(FOLDER_MARKER);
    let res = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(FILE_PERMISSIONS)
        .open(&marker);

    match res {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn files(dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn filenames_are_unique_within_a_second() {
        let names: HashSet<String> = (0..100).map(|_| unique_filename()).collect();
        assert_eq!(names.len(), 100);

        let name = names.iter().next().unwrap();
        assert!(name.ends_with(".eml"));
        assert!(name.contains(&format!("_{}_", process::id())));
    }

    #[test]
    fn default_folder() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path());

        let path = maildir.deliver("", b"Subject: hi\r\n\r\nbody").unwrap();

        assert_eq!(path.parent().unwrap(), dir.path().join("new"));
        assert_eq!(fs::read(&path).unwrap(), b"Subject: hi\r\n\r\nbody");
        assert!(files(&dir.path().join("tmp")).is_empty());
        assert!(!dir.path().join(FOLDER_MARKER).exists());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777 & !FILE_PERMISSIONS, 0);
    }

    #[test]
    fn folder_marker_is_created_once() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path());

        maildir.deliver("invoices", b"one").unwrap();
        maildir.deliver("invoices", b"two").unwrap();

        let folder = dir.path().join(".invoices");
        assert_eq!(files(&folder.join("new")).len(), 2);

        let markers: Vec<_> = files(&folder)
            .into_iter()
            .filter(|p| p.file_name().unwrap() == FOLDER_MARKER)
            .collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(fs::metadata(&markers[0]).unwrap().len(), 0);
    }

    #[test]
    fn invalid_folder_names() {
        let dir = tempdir().unwrap();
        let user = dir.path().join("jane");
        let maildir = Maildir::new(&user);

        for folder in [".", "..", ".hidden", "../escape", "a/b", "nul\0"] {
            assert!(
                matches!(maildir.deliver(folder, b"x"), Err(UnsupportedValue(_))),
                "{:?}",
                folder
            );
        }
        // nothing next to or inside the user's maildir
        assert!(files(dir.path()).is_empty());
    }

    #[test]
    fn readers_never_see_partial_files() {
        let dir = tempdir().unwrap();
        let maildir = Maildir::new(dir.path());
        let new_dir = dir.path().join("new");
        let data = vec![b'x'; 256 * 1024];

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let done = Arc::clone(&done);
            let new_dir = new_dir.clone();
            let len = data.len() as u64;
            thread::spawn(move || {
                let mut seen = 0;
                while !done.load(Ordering::SeqCst) {
                    for path in files(&new_dir) {
                        // files may only ever appear complete
                        let size = fs::metadata(&path).unwrap().len();
                        assert_eq!(size, len, "{}", path.display());
                        seen += 1;
                    }
                }
                seen
            })
        };

        for _ in 0..20 {
            maildir.deliver("", &data).unwrap();
        }
        done.store(true, Ordering::SeqCst);

        reader.join().unwrap();
        assert_eq!(files(&new_dir).len(), 20);
    }
}
