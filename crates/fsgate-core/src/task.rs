// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The calling task and the collaborators it brings to every syscall.

use crate::creds::Credentials;
use crate::error::{FsError, FsResult};
use crate::file::FileRef;
use crate::lock::Blocker;
use crate::node::DirentRef;
use crate::types::{FdFlags, FileOwner, SignalInfo};
use std::sync::{Arc, Mutex};

/// Per-task descriptor table. Allocation policy belongs to the implementor.
#[cfg_attr(test, mockall::automock)]
pub trait DescriptorTable: Send + Sync {
    /// Identity used as the POSIX lock owner.
    fn id(&self) -> u64;

    fn get(&self, fd: i32) -> Option<(FileRef, FdFlags)>;

    /// Installs `file` at the lowest free number not below `min_fd`.
    fn new_fd_from(&self, min_fd: i32, file: FileRef, flags: FdFlags) -> FsResult<i32>;

    /// Installs `file` at exactly `fd` and returns the file it displaced.
    /// Numbers outside the table's range are `BadFileDescriptor`.
    fn new_fd_at(&self, fd: i32, file: FileRef, flags: FdFlags) -> FsResult<Option<FileRef>>;

    fn set_flags(&self, fd: i32, flags: FdFlags) -> FsResult<()>;

    /// Detaches `fd` from the table.
    fn remove(&self, fd: i32) -> Option<FileRef>;
}

/// Resource limits of the task's thread group.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceLimits: Send + Sync {
    /// `RLIMIT_FSIZE` soft limit in bytes.
    fn file_size_limit(&self) -> u64;
}

/// Signal delivery to the calling task.
#[cfg_attr(test, mockall::automock)]
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, info: SignalInfo);

    /// Whether a signal is pending that should interrupt a blocking wait.
    fn interrupted(&self) -> bool;
}

/// No resource limits.
pub struct Unlimited;

impl ResourceLimits for Unlimited {
    fn file_size_limit(&self) -> u64 {
        u64::MAX
    }
}

/// Drops signals and never interrupts.
pub struct IgnoreSignals;

impl SignalSink for IgnoreSignals {
    fn send_signal(&self, info: SignalInfo) {
        tracing::debug!(signo = info.signo, "dropping signal with no sink");
    }

    fn interrupted(&self) -> bool {
        false
    }
}

struct FsContextState {
    root: DirentRef,
    cwd: DirentRef,
    umask: u32,
}

/// Root, working directory and umask of a task.
pub struct FsContext {
    state: Mutex<FsContextState>,
}

impl FsContext {
    pub fn new(root: DirentRef, cwd: DirentRef, umask: u32) -> Self {
        Self {
            state: Mutex::new(FsContextState {
                root,
                cwd,
                umask: umask & 0o777,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FsContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root_directory(&self) -> DirentRef {
        self.state().root.clone()
    }

    pub fn working_directory(&self) -> DirentRef {
        self.state().cwd.clone()
    }

    pub fn set_root_directory(&self, root: DirentRef) {
        // The previous reference is released after the guard drops.
        let _old = std::mem::replace(&mut self.state().root, root);
    }

    pub fn set_working_directory(&self, cwd: DirentRef) {
        let _old = std::mem::replace(&mut self.state().cwd, cwd);
    }

    pub fn umask(&self) -> u32 {
        self.state().umask
    }

    /// Installs `mask & 0o777` and returns the previous umask.
    pub fn swap_umask(&self, mask: u32) -> u32 {
        std::mem::replace(&mut self.state().umask, mask & 0o777)
    }
}

/// A task issuing syscalls.
pub struct Task {
    creds: Mutex<Arc<Credentials>>,
    fs: FsContext,
    fd_table: Arc<dyn DescriptorTable>,
    limits: Arc<dyn ResourceLimits>,
    signals: Arc<dyn SignalSink>,
}

impl Task {
    /// A task rooted at `root` with its working directory at the root,
    /// umask 022, no limits and no signal delivery.
    pub fn new(creds: Credentials, root: DirentRef, fd_table: Arc<dyn DescriptorTable>) -> Self {
        Self {
            creds: Mutex::new(Arc::new(creds)),
            fs: FsContext::new(root.clone(), root, 0o022),
            fd_table,
            limits: Arc::new(Unlimited),
            signals: Arc::new(IgnoreSignals),
        }
    }

    pub fn with_limits(mut self, limits: Arc<dyn ResourceLimits>) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    /// Current credentials snapshot.
    pub fn credentials(&self) -> Arc<Credentials> {
        self.creds.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn set_credentials(&self, creds: Credentials) {
        *self.creds.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(creds);
    }

    pub fn fs(&self) -> &FsContext {
        &self.fs
    }

    pub fn fd_table(&self) -> &Arc<dyn DescriptorTable> {
        &self.fd_table
    }

    /// The open file behind `fd`.
    pub fn file(&self, fd: i32) -> FsResult<FileRef> {
        self.fd_table
            .get(fd)
            .map(|(file, _)| file)
            .ok_or(FsError::BadFileDescriptor)
    }

    pub fn file_size_limit(&self) -> u64 {
        self.limits.file_size_limit()
    }

    pub fn send_signal(&self, info: SignalInfo) {
        self.signals.send_signal(info);
    }

    /// Owner given to nodes this task creates.
    pub fn file_owner(&self) -> FileOwner {
        let creds = self.credentials();
        FileOwner {
            uid: creds.effective_kuid,
            gid: creds.effective_kgid,
        }
    }
}

impl Blocker for Task {
    fn interrupted(&self) -> bool {
        self.signals.interrupted()
    }
}
