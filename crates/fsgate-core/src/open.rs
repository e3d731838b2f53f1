// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! open(2), openat(2) and creat(2).

use crate::abi;
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::file::FileRef;
use crate::node::{DirentRef, SymlinkResolution};
use crate::path::{PathArg, split_last};
use crate::resolve::DirFd;
use crate::task::Task;
use crate::types::{FdFlags, FileFlags, FilePerms, NewNodeAttrs, NodeKind, PermMask};

/// The name an `O_CREAT` open is currently trying to resolve.
struct CreateTarget {
    parent: DirentRef,
    name: String,
}

impl FsDispatcher {
    /// openat(2). `O_CREAT` selects the create-or-open path.
    pub fn open_at(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &str,
        flags: u32,
        mode: u32,
    ) -> FsResult<i32> {
        let path = self.parse_path(path, false)?;
        if flags & abi::O_CREAT != 0 {
            self.create_at(task, dirfd, &path, flags, mode)
        } else {
            self.open_existing(task, dirfd, &path, flags)
        }
    }

    pub fn open(&self, task: &Task, path: &str, flags: u32, mode: u32) -> FsResult<i32> {
        self.open_at(task, DirFd::Cwd, path, flags, mode)
    }

    pub fn creat(&self, task: &Task, path: &str, mode: u32) -> FsResult<i32> {
        self.open_at(
            task,
            DirFd::Cwd,
            path,
            abi::O_WRONLY | abi::O_CREAT | abi::O_TRUNC,
            mode,
        )
    }

    fn open_existing(&self, task: &Task, dirfd: DirFd, path: &PathArg, flags: u32) -> FsResult<i32> {
        let creds = task.credentials();
        let follow = flags & abi::O_NOFOLLOW == 0;
        self.file_op_on(task, dirfd, path.as_str(), follow, |_root, d, _budget| {
            check_open_target(d, flags, path.dir_path())?;
            // get_file may block or have side effects on special files.
            d.inode().check_permission(&creds, PermMask::from_open_flags(flags))?;
            let file = d.inode().get_file(d, FileFlags::from_linux(flags))?;
            if flags & abi::O_TRUNC != 0 {
                self.truncate_for_open(d)?;
            }
            let fd = install(task, file, flags)?;
            self.notify_opened(d);
            tracing::debug!(path = path.as_str(), fd, "opened");
            Ok(fd)
        })
    }

    fn create_at(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &PathArg,
        flags: u32,
        mode: u32,
    ) -> FsResult<i32> {
        if path.dir_path() {
            return Err(FsError::NotFound);
        }
        let creds = task.credentials();
        let file_flags = FileFlags::from_linux(flags);

        self.file_op_at(task, dirfd, path.as_str(), |root, parent, name, budget| {
            let mut budget = budget;
            let walker = self.walker(&creds, root);
            let mut target = CreateTarget {
                parent: parent.clone(),
                name: name.to_string(),
            };

            // Each pass either settles on a node, settles on creating
            // `target`, or moves `target` to the text of a symlink.
            let existing = loop {
                if !target.parent.is_dir() {
                    return Err(FsError::NotADirectory);
                }
                let found = match walker.find_link(&target.parent, &target.name, &mut budget) {
                    Ok(found) => found,
                    Err(FsError::NotFound) => break None,
                    Err(err) => return Err(err),
                };
                if flags & abi::O_EXCL != 0 {
                    return Err(FsError::AlreadyExists);
                }
                if !found.is_symlink() {
                    break Some(found);
                }
                if flags & abi::O_NOFOLLOW != 0 {
                    return Err(FsError::TooManySymlinks);
                }
                // A direct target is opened as found: it costs no budget and
                // is not followed again if it is itself a symlink.
                if let SymlinkResolution::Direct(resolved) = found.inode().getlink()? {
                    break Some(resolved);
                }

                budget.consume()?;
                let link = found.inode().readlink()?;
                let (dir, base) = split_last(&link);
                let next_parent = walker.find_inode(&target.parent, dir, &mut budget)?;
                tracing::trace!(link = %link, "create follows symlink");
                target = CreateTarget {
                    parent: next_parent,
                    name: base.to_string(),
                };
            };

            let file = match existing {
                Some(found) => {
                    if found.is_dir() {
                        return Err(FsError::IsADirectory);
                    }
                    check_open_target(&found, flags, false)?;
                    found.inode().check_permission(&creds, PermMask::from_open_flags(flags))?;
                    if flags & abi::O_TRUNC != 0 {
                        self.truncate_for_open(&found)?;
                    }
                    found.inode().get_file(&found, file_flags)?
                }
                None => {
                    if target.name.is_empty() {
                        return Err(FsError::IsADirectory);
                    }
                    target
                        .parent
                        .inode()
                        .check_permission(&creds, PermMask::WRITE_EXECUTE)?;
                    let attrs = NewNodeAttrs {
                        perms: FilePerms::from_mode(mode & !task.fs().umask()),
                        owner: task.file_owner(),
                    };
                    target
                        .parent
                        .inode()
                        .create(&target.parent, &target.name, file_flags, attrs)?
                }
            };

            let fd = install(task, file.clone(), flags)?;
            self.notify_opened(file.dirent());
            tracing::debug!(path = path.as_str(), fd, "opened with O_CREAT");
            Ok(fd)
        })
    }

    /// `O_TRUNC` on an existing node.
    fn truncate_for_open(&self, d: &DirentRef) -> FsResult<()> {
        match d.kind() {
            NodeKind::Regular => {
                d.inode().truncate(0)?;
                self.notify_modified(d);
                Ok(())
            }
            NodeKind::Directory => Err(FsError::IsADirectory),
            NodeKind::Symlink => Err(FsError::TooManySymlinks),
            NodeKind::Fifo | NodeKind::Socket | NodeKind::CharDevice | NodeKind::BlockDevice => {
                Ok(())
            }
        }
    }
}

/// Type checks an open target must pass before any permission check.
fn check_open_target(d: &DirentRef, flags: u32, dir_path: bool) -> FsResult<()> {
    match d.kind() {
        NodeKind::Directory => {
            if PermMask::from_open_flags(flags).write {
                return Err(FsError::IsADirectory);
            }
            Ok(())
        }
        NodeKind::Symlink => Err(FsError::TooManySymlinks),
        NodeKind::Regular
        | NodeKind::Fifo
        | NodeKind::Socket
        | NodeKind::CharDevice
        | NodeKind::BlockDevice => {
            if flags & abi::O_DIRECTORY != 0 || dir_path {
                return Err(FsError::NotADirectory);
            }
            Ok(())
        }
    }
}

fn install(task: &Task, file: FileRef, flags: u32) -> FsResult<i32> {
    let fd_flags = FdFlags {
        close_on_exec: flags & abi::O_CLOEXEC != 0,
    };
    task.fd_table().new_fd_from(0, file, fd_flags)
}
