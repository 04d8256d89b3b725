/*!
Filesystem write-freeze around snapshot creation.

Freezing a mounted filesystem makes the kernel flush dirty data and block new
writes until it is thawed, so a block-level snapshot started while frozen is
crash-consistent. [`FreezeGuard`] ties the thaw to scope exit.
*/

use crate::{Result, RotateError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Host filesystem operations the snapshot creator needs
#[cfg_attr(test, mockall::automock)]
pub trait FilesystemControl {
    /// Flush dirty pages to disk. Best-effort; callers log failures.
    fn sync(&self) -> Result<()>;

    /// Block writes to the filesystem mounted at `path`
    fn freeze(&self, path: &Path) -> Result<()>;

    /// Resume writes to the filesystem mounted at `path`
    fn thaw(&self, path: &Path) -> Result<()>;
}

/// `FilesystemControl` backed by `sync(1)` and util-linux `fsfreeze(8)`
#[derive(Debug, Clone)]
pub struct FsFreeze {
    fsfreeze_bin: PathBuf,
    use_sudo: bool,
}

impl FsFreeze {
    /// Run `sudo /sbin/fsfreeze`
    pub fn new() -> Self {
        Self {
            fsfreeze_bin: PathBuf::from("/sbin/fsfreeze"),
            use_sudo: true,
        }
    }

    /// Use a different fsfreeze binary
    pub fn with_binary<P: AsRef<Path>>(mut self, bin: P) -> Self {
        self.fsfreeze_bin = bin.as_ref().to_path_buf();
        self
    }

    /// Run fsfreeze directly, e.g. when already root
    pub fn without_sudo(mut self) -> Self {
        self.use_sudo = false;
        self
    }

    fn fsfreeze(&self, flag: &str, path: &Path) -> std::result::Result<(), String> {
        let mut command = if self.use_sudo {
            let mut command = Command::new("sudo");
            command.arg(&self.fsfreeze_bin);
            command
        } else {
            Command::new(&self.fsfreeze_bin)
        };
        command.arg(flag).arg(path);
        run_command(command)
    }
}

impl Default for FsFreeze {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemControl for FsFreeze {
    fn sync(&self) -> Result<()> {
        run_command(Command::new("sync")).map_err(RotateError::service)
    }

    fn freeze(&self, path: &Path) -> Result<()> {
        self.fsfreeze("-f", path)
            .map_err(|reason| RotateError::FreezeFailed {
                path: path.to_path_buf(),
                reason,
            })
    }

    fn thaw(&self, path: &Path) -> Result<()> {
        self.fsfreeze("-u", path)
            .map_err(|reason| RotateError::ThawFailed {
                path: path.to_path_buf(),
                reason,
            })
    }
}

fn run_command(mut command: Command) -> std::result::Result<(), String> {
    let output = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("Failed to execute {command:?}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{command:?} failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }
    Ok(())
}

/// A held write-freeze; thawed on [`release`](FreezeGuard::release) or drop
///
/// # Example
/// ```rust,no_run
/// use rollsnap_core::freeze::{FreezeGuard, FsFreeze};
///
/// let fs = FsFreeze::new();
/// let guard = FreezeGuard::acquire(&fs, "/var/lib/postgresql")?;
/// // ... start the snapshot ...
/// guard.release()?;
/// # Ok::<(), rollsnap_core::RotateError>(())
/// ```
pub struct FreezeGuard<'a, F: FilesystemControl + ?Sized> {
    fs: &'a F,
    path: PathBuf,
    released: bool,
}

impl<'a, F: FilesystemControl + ?Sized> FreezeGuard<'a, F> {
    /// Freeze `path`, returning a guard that thaws it
    ///
    /// # Errors
    /// `RotateError::FreezeFailed` if the freeze could not be acquired; nothing
    /// is held in that case.
    pub fn acquire<P: AsRef<Path>>(fs: &'a F, path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "Freezing filesystem");
        fs.freeze(&path).map_err(|e| match e {
            RotateError::FreezeFailed { .. } => e,
            other => RotateError::FreezeFailed {
                path: path.clone(),
                reason: other.to_string(),
            },
        })?;
        Ok(Self {
            fs,
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Thaw now and report whether the thaw succeeded
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.thaw()
    }

    fn thaw(&self) -> Result<()> {
        info!(path = %self.path.display(), "Thawing filesystem");
        self.fs.thaw(&self.path).map_err(|e| match e {
            RotateError::ThawFailed { .. } => e,
            other => RotateError::ThawFailed {
                path: self.path.clone(),
                reason: other.to_string(),
            },
        })
    }
}

impl<F: FilesystemControl + ?Sized> Drop for FreezeGuard<'_, F> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(path = %self.path.display(), "Freeze guard dropped without release");
        if let Err(e) = self.thaw() {
            error!(path = %self.path.display(), error = %e, "Failed to thaw filesystem");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_release_thaws_once() {
        let mut fs = MockFilesystemControl::new();
        let mut seq = Sequence::new();
        fs.expect_freeze()
            .with(eq(PathBuf::from("/data")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        fs.expect_thaw()
            .with(eq(PathBuf::from("/data")))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let guard = FreezeGuard::acquire(&fs, "/data").unwrap();
        assert_eq!(guard.path(), Path::new("/data"));
        assert!(guard.release().is_ok());
    }

    #[test]
    fn test_drop_thaws_once() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_freeze().times(1).returning(|_| Ok(()));
        fs.expect_thaw().times(1).returning(|_| Ok(()));

        {
            let _guard = FreezeGuard::acquire(&fs, "/data").unwrap();
        }
    }

    #[test]
    fn test_failed_freeze_holds_nothing() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_freeze().times(1).returning(|p| {
            Err(RotateError::FreezeFailed {
                path: p.to_path_buf(),
                reason: "Device or resource busy".to_string(),
            })
        });
        fs.expect_thaw().times(0);

        let result = FreezeGuard::acquire(&fs, "/data");
        assert!(matches!(result, Err(RotateError::FreezeFailed { .. })));
    }

    #[test]
    fn test_freeze_errors_are_normalized() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_freeze()
            .returning(|_| Err(RotateError::service("sudo: a password is required")));

        let result = FreezeGuard::acquire(&fs, "/data");
        match result {
            Err(RotateError::FreezeFailed { path, reason }) => {
                assert_eq!(path, PathBuf::from("/data"));
                assert!(reason.contains("password"));
            }
            _ => panic!("Expected FreezeFailed"),
        }
    }

    #[test]
    fn test_release_surfaces_thaw_failure() {
        let mut fs = MockFilesystemControl::new();
        fs.expect_freeze().returning(|_| Ok(()));
        fs.expect_thaw()
            .times(1)
            .returning(|_| Err(RotateError::service("exit 1")));

        let guard = FreezeGuard::acquire(&fs, "/data").unwrap();
        assert!(matches!(
            guard.release(),
            Err(RotateError::ThawFailed { .. })
        ));
    }

    #[test]
    fn test_fsfreeze_reports_missing_binary() {
        let fs = FsFreeze::new()
            .with_binary("/nonexistent/fsfreeze")
            .without_sudo();
        let err = fs.freeze(Path::new("/tmp")).unwrap_err();
        match err {
            RotateError::FreezeFailed { path, reason } => {
                assert_eq!(path, PathBuf::from("/tmp"));
                assert!(reason.contains("Failed to execute"));
            }
            other => panic!("Expected FreezeFailed, got {other:?}"),
        }
    }
}
