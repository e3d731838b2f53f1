// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The naming graph as seen by the dispatcher.
//!
//! Backends implement [`Inode`] and [`Dirent`]. The core never holds a bare
//! `Arc<dyn Dirent>`: every reference it keeps is a [`DirentRef`], which
//! acquires on construction and clone and releases exactly once on drop.

use crate::creds::Credentials;
use crate::error::{FsError, FsResult};
use crate::file::{File, FileRef};
use crate::lock::LockContext;
use crate::policy;
use crate::types::{
    FileFlags, FileOwner, FilePerms, InodeId, NewNodeAttrs, NodeKind, PermMask, StableAttr,
    TimestampUpdate, UnstableAttr,
};
use std::sync::Arc;

/// How a symlink reaches its target.
pub enum SymlinkResolution {
    /// The backend produced the target node itself.
    Direct(DirentRef),
    /// The target must be resolved from the link text.
    ViaReadlink,
}

/// A filesystem object and the operations its backend supports.
///
/// Naming operations receive the directory's own [`DirentRef`] so that
/// backends can link new dirents to their parent. Defaults reject the
/// operation with a fixed error.
pub trait Inode: Send + Sync {
    fn stable_attr(&self) -> StableAttr;

    fn unstable_attr(&self) -> FsResult<UnstableAttr>;

    /// Checks `mask` against the inode's mode bits for `creds`.
    fn check_permission(&self, creds: &Credentials, mask: PermMask) -> FsResult<()> {
        let attr = self.unstable_attr().map_err(|_| FsError::PermissionDenied)?;
        policy::generic_check(creds, self.stable_attr().kind, &attr, mask)
    }

    /// Looks up one component. `name` is never `.`, `..` or empty.
    fn lookup(&self, _dir: &DirentRef, _name: &str) -> FsResult<DirentRef> {
        Err(FsError::NotADirectory)
    }

    /// Creates a regular file and opens it.
    fn create(
        &self,
        _dir: &DirentRef,
        _name: &str,
        _flags: FileFlags,
        _attrs: NewNodeAttrs,
    ) -> FsResult<FileRef> {
        Err(FsError::NotADirectory)
    }

    fn create_directory(&self, _dir: &DirentRef, _name: &str, _attrs: NewNodeAttrs) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    /// Creates a symlink named `name` pointing at `target`.
    fn create_link(
        &self,
        _dir: &DirentRef,
        _target: &str,
        _name: &str,
        _owner: FileOwner,
    ) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    fn create_hard_link(&self, _dir: &DirentRef, _target: &DirentRef, _name: &str) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    fn create_fifo(&self, _dir: &DirentRef, _name: &str, _attrs: NewNodeAttrs) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    /// Removes a non-directory entry.
    fn remove(&self, _dir: &DirentRef, _name: &str) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    /// Removes an empty directory entry.
    fn remove_directory(&self, _dir: &DirentRef, _name: &str) -> FsResult<()> {
        Err(FsError::NotADirectory)
    }

    /// Moves `old_name` under `old_parent` to `new_name` under `new_parent`,
    /// atomically with respect to lookups. `self` is the old parent's inode.
    fn rename(
        &self,
        _old_parent: &DirentRef,
        _old_name: &str,
        _new_parent: &DirentRef,
        _new_name: &str,
        _replacement: bool,
    ) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn readlink(&self) -> FsResult<String> {
        Err(FsError::InvalidArgument)
    }

    fn getlink(&self) -> FsResult<SymlinkResolution> {
        Ok(SymlinkResolution::ViaReadlink)
    }

    /// Produces an open file for `dirent`. May block, e.g. on a fifo.
    fn get_file(&self, dirent: &DirentRef, flags: FileFlags) -> FsResult<FileRef> {
        Ok(File::new(dirent.clone(), flags))
    }

    fn truncate(&self, _size: u64) -> FsResult<()> {
        Err(FsError::InvalidArgument)
    }

    fn allocate(&self, _offset: u64, _len: u64) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    /// Invalid ids in `owner` leave that half unchanged.
    fn set_owner(&self, _owner: FileOwner) -> FsResult<()> {
        Err(FsError::OperationNotPermitted)
    }

    fn set_permissions(&self, _perms: FilePerms) -> FsResult<()> {
        Err(FsError::OperationNotPermitted)
    }

    fn set_timestamps(&self, _update: TimestampUpdate) -> FsResult<()> {
        Err(FsError::OperationNotPermitted)
    }

    fn lock_context(&self) -> Option<LockContext> {
        None
    }
}

/// A named edge in the naming graph.
///
/// For directories, `name` and `parent` must report where the directory is
/// linked now, not where it was when the dirent was produced: rename cycle
/// checks, `..` and getcwd all walk this chain.
pub trait Dirent: Send + Sync {
    fn name(&self) -> String;

    fn inode(&self) -> &dyn Inode;

    /// `None` at the top of the graph and for removed directories.
    fn parent(&self) -> Option<DirentRef>;

    /// Called once per live [`DirentRef`] when it is created or cloned.
    fn acquire(&self) {}

    /// Called once per live [`DirentRef`] when it is dropped.
    fn release(&self) {}
}

/// Owned, counted reference to a dirent.
pub struct DirentRef(Arc<dyn Dirent>);

impl DirentRef {
    /// Takes a new reference on `dirent`.
    pub fn new(dirent: Arc<dyn Dirent>) -> Self {
        dirent.acquire();
        DirentRef(dirent)
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn inode(&self) -> &dyn Inode {
        self.0.inode()
    }

    pub fn parent(&self) -> Option<DirentRef> {
        self.0.parent()
    }

    pub fn stable_attr(&self) -> StableAttr {
        self.inode().stable_attr()
    }

    pub fn id(&self) -> InodeId {
        self.stable_attr().id
    }

    pub fn kind(&self) -> NodeKind {
        self.stable_attr().kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind().is_symlink()
    }

    /// Whether both references name the same inode.
    pub fn same_node(&self, other: &DirentRef) -> bool {
        let (a, b) = (self.stable_attr(), other.stable_attr());
        a.id == b.id && a.device == b.device
    }

    /// Whether this dirent is `ancestor` or lies beneath it.
    pub fn descendant_of(&self, ancestor: &DirentRef) -> bool {
        let mut current = self.clone();
        loop {
            if current.same_node(ancestor) {
                return true;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Path from `root` to this dirent, and whether `root` was reached.
    ///
    /// When the walk runs off the top of the graph without meeting `root`
    /// the path is relative to the graph's own root.
    pub fn full_name(&self, root: &DirentRef) -> (String, bool) {
        let mut names = Vec::new();
        let mut current = self.clone();
        let reachable = loop {
            if current.same_node(root) {
                break true;
            }
            match current.parent() {
                Some(parent) => {
                    names.push(current.name());
                    current = parent;
                }
                None => break false,
            }
        };
        if names.is_empty() {
            return ("/".to_string(), reachable);
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        (path, reachable)
    }
}

impl Clone for DirentRef {
    fn clone(&self) -> Self {
        DirentRef::new(self.0.clone())
    }
}

impl Drop for DirentRef {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl std::fmt::Debug for DirentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirentRef")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}
