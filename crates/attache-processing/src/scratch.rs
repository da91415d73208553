//! Per-job scratch space.
//!
//! Conversion stages exchange intermediate files through a [`ScratchDir`]. The
//! directory and everything in it is removed when the value is dropped, which
//! covers success, early `?` returns and unwinding panics alike.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new(job_id: Uuid) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("attache-{}-", job_id))
            .tempdir()?;
        tracing::trace!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create (if needed) and return a subdirectory.
    pub fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn removed_on_drop() {
        let scratch = ScratchDir::new(Uuid::new_v4()).unwrap();
        let sub = scratch.subdir("stage").unwrap();
        fs::write(sub.join("chunk.bin"), [0u8; 16]).unwrap();
        let root = scratch.path().to_path_buf();
        assert!(root.join("stage/chunk.bin").exists());

        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn removed_on_early_return() {
        fn failing_stage(root: &mut Option<PathBuf>) -> io::Result<()> {
            let scratch = ScratchDir::new(Uuid::new_v4())?;
            *root = Some(scratch.path().to_path_buf());
            fs::write(scratch.path().join("partial.bin"), b"abc")?;
            Err(io::Error::new(io::ErrorKind::Other, "stage failed"))
        }

        let mut root = None;
        assert!(failing_stage(&mut root).is_err());
        assert!(!root.unwrap().exists());
    }

    #[test]
    fn removed_on_panic() {
        let root: Arc<Mutex<Option<PathBuf>>> = Arc::default();
        let slot = root.clone();
        let result = std::panic::catch_unwind(move || {
            let scratch = ScratchDir::new(Uuid::new_v4()).unwrap();
            *slot.lock().unwrap() = Some(scratch.path().to_path_buf());
            panic!("converter blew up");
        });
        assert!(result.is_err());
        let root = root.lock().unwrap().clone().unwrap();
        assert!(!root.exists());
    }
}
