use std::path::{Path, PathBuf};

const MARKER_FILE: &str = ".cswitch.lock";

/// The crash marker exists exactly while a process is running; finding
/// it at startup means the previous process never shut down cleanly.
pub(crate) struct CrashMarker {
    path: PathBuf,
}

impl CrashMarker {
    pub(crate) fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(MARKER_FILE)
    }

    /// Returns the marker handle and whether an unclean shutdown was
    /// detected.
    pub(crate) fn arm(data_dir: &Path) -> std::io::Result<(Self, bool)> {
        let path = Self::path_in(data_dir);
        let crashed = path.exists();
        if !crashed {
            std::fs::write(&path, std::process::id().to_string())?;
        }
        Ok((Self { path }, crashed))
    }

    pub(crate) fn disarm(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
