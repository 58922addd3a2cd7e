//! Network namespace handles
//!
//! Provides:
//! - `NetnsHandle`, an open reference to a network namespace
//! - The `NamespaceResolver` trait and its `/proc` backed implementation
//! - `netns_command` for running helper programs inside a namespace

use crate::error::{Error, Result};
use nix::sched::{CloneFlags, setns};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// An open network namespace file together with the path it came from
#[derive(Debug)]
pub struct NetnsHandle {
    path: PathBuf,
    fd: Option<OwnedFd>,
}

impl NetnsHandle {
    /// Open a namespace file such as `/var/run/netns/web` or `/proc/<pid>/ns/net`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::NamespaceOpen {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            fd: Some(OwnedFd::from(file)),
        })
    }

    /// A handle that only names a namespace, for in-memory backends
    #[cfg(test)]
    pub(crate) fn detached(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fd: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> Option<&OwnedFd> {
        self.fd.as_ref()
    }
}

/// Resolves namespace paths to handles
pub trait NamespaceResolver: Send + Sync {
    /// Open the namespace at `path`
    fn open(&self, path: &Path) -> Result<NetnsHandle>;

    /// Open the namespace of the calling thread
    fn caller(&self) -> Result<NetnsHandle>;
}

/// Resolver backed by the `/proc` filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcResolver;

impl ProcResolver {
    /// Path of the calling thread's network namespace
    ///
    /// Uses the pid/tid form instead of `/proc/self` so the path stays valid when
    /// handed to a child process.
    pub fn caller_path() -> PathBuf {
        let pid = nix::unistd::getpid();
        let tid = nix::unistd::gettid();
        PathBuf::from(format!("/proc/{}/task/{}/ns/net", pid, tid))
    }
}

impl NamespaceResolver for ProcResolver {
    fn open(&self, path: &Path) -> Result<NetnsHandle> {
        NetnsHandle::open(path)
    }

    fn caller(&self) -> Result<NetnsHandle> {
        NetnsHandle::open(Self::caller_path())
    }
}

/// Build a command that runs inside `netns`, or in the current namespace
///
/// The child joins the namespace with setns(2) between fork and exec.
pub fn netns_command(program: &str, netns: Option<&NetnsHandle>) -> Command {
    let mut cmd = Command::new(program);

    if let Some(fd) = netns.and_then(NetnsHandle::fd) {
        let raw = fd.as_raw_fd();
        // SAFETY: setns(2) is async-signal-safe and `raw` stays open in the
        // child because the handle outlives the spawn.
        unsafe {
            cmd.pre_exec(move || {
                let fd = BorrowedFd::borrow_raw(raw);
                setns(fd, CloneFlags::CLONE_NEWNET).map_err(io::Error::from)
            });
        }
    }

    cmd
}

/// Keep `fd` open across exec in the child of `cmd`
///
/// Returns a path naming the descriptor from inside the child, for programs
/// that take a namespace file argument.
pub fn inherit_fd(cmd: &mut Command, fd: &OwnedFd) -> String {
    let raw = fd.as_raw_fd();
    // SAFETY: fcntl(2) is async-signal-safe. Only the child's copy of the
    // descriptor loses FD_CLOEXEC.
    unsafe {
        cmd.pre_exec(move || {
            if libc::fcntl(raw, libc::F_SETFD, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    format!("/proc/self/fd/{}", raw)
}
