// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fsgate core - path resolution and file-operation dispatch
//!
//! Syscall-shaped entry points on [`FsDispatcher`] resolve guest paths over
//! an abstract inode/dirent graph supplied by a backend, enforce the
//! permission, ownership and capability rules, and hand the final mutation
//! to the backend. [`memfs::MemFs`] is the in-memory backend used by tests
//! and embedders that need a scratch namespace.

pub mod abi;
pub mod attrs;
pub mod config;
pub mod creds;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod fd;
pub mod file;
pub mod lock;
pub mod memfs;
pub mod node;
pub mod open;
pub mod ops;
pub mod path;
pub mod policy;
pub mod resolve;
pub mod task;
pub mod types;
pub mod walk;

pub use attrs::Timeval;
pub use config::DispatchConfig;
pub use creds::{Capability, CapabilitySet, Credentials, Kgid, Kuid, UserNamespace};
pub use dispatch::FsDispatcher;
pub use error::{FsError, FsResult};
pub use fd::FcntlCmd;
pub use file::{File, FileId, FileRef};
pub use lock::{AdvisoryLocks, Blocker, Flock, LockContext, LockKind, LockOwner, LockRange};
pub use node::{Dirent, DirentRef, Inode, SymlinkResolution};
pub use resolve::{DirFd, Resolved, ResolvedParent};
pub use task::{DescriptorTable, FsContext, ResourceLimits, SignalSink, Task};
pub use types::*;
pub use walk::SymlinkBudget;


#[cfg(test)]
mod test_namespace_ops;
#[cfg(test)]
mod test_open;
#[cfg(test)]
mod test_refcount;
