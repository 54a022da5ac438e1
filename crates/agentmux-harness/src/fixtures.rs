//! Throwaway runtime directory fixtures.

use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use agentmux_types::Config;

/// A temp runtime directory with helpers for creating pipes and a config
/// pointed at it. Removed on drop.
pub struct RuntimeFixture {
    dir: tempfile::TempDir,
}

impl RuntimeFixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp runtime dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A config whose runtime directory is this fixture. Timings are left
    /// at their defaults; tests tighten what they need.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.project_name = "fixture".into();
        config.runtime_dir = self.root().to_path_buf();
        config
    }

    /// Create a named pipe in the runtime directory.
    pub fn mkfifo(&self, name: &str) -> PathBuf {
        let path = self.root().join(name);
        nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o600)).expect("mkfifo");
        path
    }

    /// Write one line to a pipe the way a producer would.
    ///
    /// Opens write-only and non-blocking, so a reader must already be
    /// attached (the daemon's `O_RDWR` reader counts).
    pub fn write_line(&self, name: &str, line: &str) {
        let path = self.root().join(name);
        let raw_fd = nix::fcntl::open(&path, OFlag::O_WRONLY | OFlag::O_NONBLOCK, Mode::empty())
            .unwrap_or_else(|e| panic!("open {} for write: {e}", path.display()));
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let mut payload = line.trim_end_matches('\n').to_string();
        payload.push('\n');
        let bytes = payload.as_bytes();
        let mut written = 0;
        while written < bytes.len() {
            written += nix::unistd::write(fd.as_fd(), &bytes[written..]).expect("fifo write");
        }
    }
}

impl Default for RuntimeFixture {
    fn default() -> Self {
        Self::new()
    }
}
