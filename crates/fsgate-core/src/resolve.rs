// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Anchor-relative resolution (`*at` semantics).

use crate::abi;
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::node::DirentRef;
use crate::path::{is_absolute, split_last};
use crate::task::Task;
use crate::walk::SymlinkBudget;

/// Starting point for relative paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirFd {
    /// `AT_FDCWD`
    Cwd,
    Fd(i32),
}

impl DirFd {
    pub fn from_raw(fd: i32) -> Self {
        if fd == abi::AT_FDCWD {
            DirFd::Cwd
        } else {
            DirFd::Fd(fd)
        }
    }
}

/// A resolved node together with the task root it was resolved under.
#[derive(Debug)]
pub struct Resolved {
    pub root: DirentRef,
    pub node: DirentRef,
    pub budget: SymlinkBudget,
}

/// A resolved parent directory and the final name beneath it.
#[derive(Debug)]
pub struct ResolvedParent {
    pub root: DirentRef,
    pub parent: DirentRef,
    pub name: String,
    pub budget: SymlinkBudget,
}

impl FsDispatcher {
    /// Directory relative paths start from. Absolute paths ignore `dirfd`.
    fn anchor(&self, task: &Task, dirfd: DirFd, path: &str) -> FsResult<Option<DirentRef>> {
        if is_absolute(path) {
            return Ok(None);
        }
        match dirfd {
            DirFd::Cwd => Ok(Some(task.fs().working_directory())),
            DirFd::Fd(fd) => {
                let file = task.file(fd)?;
                let dirent = file.dirent().clone();
                if !dirent.is_dir() {
                    return Err(FsError::NotADirectory);
                }
                Ok(Some(dirent))
            }
        }
    }

    /// Resolves `path` relative to `dirfd`. With `follow`, a final symlink is
    /// resolved to its target; otherwise the link itself is returned.
    pub fn resolve(&self, task: &Task, dirfd: DirFd, path: &str, follow: bool) -> FsResult<Resolved> {
        let anchor = self.anchor(task, dirfd, path)?;
        let root = task.fs().root_directory();
        let creds = task.credentials();
        let mut budget = self.new_budget();
        let walker = self.walker(&creds, &root);
        let start = anchor.as_ref().unwrap_or(&root);
        let node = if follow {
            walker.find_inode(start, path, &mut budget)
        } else {
            walker.find_link(start, path, &mut budget)
        };
        let node = node.inspect_err(|err| tracing::debug!(path, %err, "resolution failed"))?;
        Ok(Resolved { root, node, budget })
    }

    /// Runs `op` on the node `path` resolves to. References taken for the
    /// call are released when `op` returns, whatever it returns.
    pub fn file_op_on<T>(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &str,
        follow: bool,
        op: impl FnOnce(&DirentRef, &DirentRef, SymlinkBudget) -> FsResult<T>,
    ) -> FsResult<T> {
        let resolved = self.resolve(task, dirfd, path, follow)?;
        op(&resolved.root, &resolved.node, resolved.budget)
    }

    /// Resolves all but the final component of `path`.
    ///
    /// A parent of `/` or, with [`DirFd::Cwd`], of `.` is taken directly from
    /// the task's root or working directory without walking.
    pub fn resolve_parent(&self, task: &Task, dirfd: DirFd, path: &str) -> FsResult<ResolvedParent> {
        let (dir, name) = split_last(path);
        let name = name.to_string();
        if dir == "/" {
            let root = task.fs().root_directory();
            return Ok(ResolvedParent {
                parent: root.clone(),
                root,
                name,
                budget: self.new_budget(),
            });
        }
        if dir == "." && dirfd == DirFd::Cwd {
            return Ok(ResolvedParent {
                root: task.fs().root_directory(),
                parent: task.fs().working_directory(),
                name,
                budget: self.new_budget(),
            });
        }
        let Resolved { root, node, budget } = self.resolve(task, dirfd, dir, true)?;
        Ok(ResolvedParent {
            root,
            parent: node,
            name,
            budget,
        })
    }

    /// Runs `op` with the parent directory and final name of `path`.
    pub fn file_op_at<T>(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &str,
        op: impl FnOnce(&DirentRef, &DirentRef, &str, SymlinkBudget) -> FsResult<T>,
    ) -> FsResult<T> {
        let resolved = self.resolve_parent(task, dirfd, path)?;
        op(&resolved.root, &resolved.parent, &resolved.name, resolved.budget)
    }
}
