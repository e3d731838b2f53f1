// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Namespace operations: node creation and removal, links, rename, size
//! changes and the task's root, working directory and umask.

use crate::abi;
use crate::creds::{Capability, Credentials, UserNamespace};
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::node::DirentRef;
use crate::path::trim_trailing_slashes;
use crate::policy;
use crate::resolve::DirFd;
use crate::task::Task;
use crate::types::{FileFlags, FilePerms, NewNodeAttrs, NodeKind, PermMask, SignalInfo};

impl FsDispatcher {
    /// Rejects names that cannot be created: empty, `.`, `..`, or too long.
    fn check_new_name(&self, name: &str) -> FsResult<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::AlreadyExists);
        }
        if name.len() > self.config.name_max {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    fn new_node_attrs(&self, task: &Task, mode: u32) -> NewNodeAttrs {
        NewNodeAttrs {
            perms: FilePerms::from_mode(mode & !task.fs().umask()),
            owner: task.file_owner(),
        }
    }

    /// mknodat(2). Only regular files and fifos can be created.
    pub fn mknod_at(&self, task: &Task, dirfd: DirFd, path: &str, mode: u32, _dev: u32) -> FsResult<()> {
        let path = self.parse_path(path, false)?;
        if path.dir_path() {
            return Err(FsError::NotFound);
        }
        let creds = task.credentials();
        self.file_op_at(task, dirfd, path.as_str(), |_root, parent, name, _| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;
            self.check_new_name(name)?;
            let attrs = self.new_node_attrs(task, mode);
            match mode & abi::S_IFMT {
                0 | abi::S_IFREG => {
                    let file = parent.inode().create(parent, name, FileFlags::default(), attrs)?;
                    drop(file);
                    Ok(())
                }
                abi::S_IFIFO => parent.inode().create_fifo(parent, name, attrs),
                abi::S_IFSOCK => Err(FsError::NotSupported),
                abi::S_IFCHR | abi::S_IFBLK => Err(FsError::OperationNotPermitted),
                _ => Err(FsError::InvalidArgument),
            }
        })
    }

    pub fn mknod(&self, task: &Task, path: &str, mode: u32, dev: u32) -> FsResult<()> {
        self.mknod_at(task, DirFd::Cwd, path, mode, dev)
    }

    /// mkdirat(2)
    pub fn mkdir_at(&self, task: &Task, dirfd: DirFd, path: &str, mode: u32) -> FsResult<()> {
        let path = self.parse_path(path, false)?;
        let creds = task.credentials();
        self.file_op_at(task, dirfd, path.as_str(), |root, parent, name, budget| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            let mut budget = budget;
            match self.walker(&creds, root).find_inode(parent, name, &mut budget) {
                Ok(_) => return Err(FsError::AlreadyExists),
                Err(FsError::PermissionDenied) => return Err(FsError::PermissionDenied),
                Err(_) => {}
            }
            parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;
            self.check_new_name(name)?;
            let attrs = self.new_node_attrs(task, mode & abi::PERMS_MASK);
            parent.inode().create_directory(parent, name, attrs)
        })
    }

    pub fn mkdir(&self, task: &Task, path: &str, mode: u32) -> FsResult<()> {
        self.mkdir_at(task, DirFd::Cwd, path, mode)
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir_at(&self, task: &Task, dirfd: DirFd, path: &str) -> FsResult<()> {
        let path = self.parse_path(path, false)?;
        if trim_trailing_slashes(path.as_str()).0 == "/" {
            return Err(FsError::Busy);
        }
        let creds = task.credentials();
        self.file_op_at(task, dirfd, path.as_str(), |_root, parent, name, _| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            match name {
                "." => return Err(FsError::InvalidArgument),
                ".." => return Err(FsError::NotEmpty),
                _ => {}
            }
            let victim = policy::may_delete(&creds, parent, name)?;
            if !victim.is_dir() {
                return Err(FsError::NotADirectory);
            }
            drop(victim);
            parent.inode().remove_directory(parent, name)
        })
    }

    pub fn rmdir(&self, task: &Task, path: &str) -> FsResult<()> {
        self.rmdir_at(task, DirFd::Cwd, path)
    }

    /// unlinkat(2). `AT_REMOVEDIR` makes this rmdir.
    pub fn unlink_at(&self, task: &Task, dirfd: DirFd, path: &str, flags: u32) -> FsResult<()> {
        if flags & !abi::AT_REMOVEDIR != 0 {
            return Err(FsError::InvalidArgument);
        }
        if flags & abi::AT_REMOVEDIR != 0 {
            return self.rmdir_at(task, dirfd, path);
        }
        let path = self.parse_path(path, false)?;
        let dir_path = path.dir_path();
        let creds = task.credentials();
        self.file_op_at(task, dirfd, path.as_str(), |_root, parent, name, _| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if name.is_empty() || name == "." || name == ".." {
                return Err(FsError::IsADirectory);
            }
            let victim = policy::may_delete(&creds, parent, name)?;
            if victim.is_dir() {
                return Err(FsError::IsADirectory);
            }
            if dir_path {
                return Err(FsError::NotADirectory);
            }
            drop(victim);
            parent.inode().remove(parent, name)
        })
    }

    pub fn unlink(&self, task: &Task, path: &str) -> FsResult<()> {
        self.unlink_at(task, DirFd::Cwd, path, 0)
    }

    /// symlinkat(2). `target` is stored verbatim.
    pub fn symlink_at(&self, task: &Task, target: &str, dirfd: DirFd, new_path: &str) -> FsResult<()> {
        let new_path = self.parse_path(new_path, false)?;
        if new_path.dir_path() {
            return Err(FsError::NotFound);
        }
        let target = self.parse_path(target, false)?;
        let creds = task.credentials();
        let owner = task.file_owner();
        self.file_op_at(task, dirfd, new_path.as_str(), |_root, parent, name, _| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;
            self.check_new_name(name)?;
            parent.inode().create_link(parent, target.as_str(), name, owner)
        })
    }

    pub fn symlink(&self, task: &Task, target: &str, new_path: &str) -> FsResult<()> {
        self.symlink_at(task, target, DirFd::Cwd, new_path)
    }

    /// linkat(2)
    pub fn link_at(
        &self,
        task: &Task,
        old_dirfd: DirFd,
        old_path: &str,
        new_dirfd: DirFd,
        new_path: &str,
        flags: u32,
    ) -> FsResult<()> {
        if flags & !(abi::AT_SYMLINK_FOLLOW | abi::AT_EMPTY_PATH) != 0 {
            return Err(FsError::InvalidArgument);
        }
        let follow = flags & abi::AT_SYMLINK_FOLLOW != 0;
        let allow_empty = flags & abi::AT_EMPTY_PATH != 0;
        let creds = task.credentials();
        if allow_empty {
            let initial = UserNamespace::initial(&creds.user_namespace);
            if !creds.has_capability_in(Capability::DacReadSearch, &initial) {
                return Err(FsError::NotFound);
            }
        }

        let old_path = self.parse_path(old_path, allow_empty)?;
        let new_path = self.parse_path(new_path, false)?;
        if new_path.dir_path() {
            return Err(FsError::NotFound);
        }

        if allow_empty && old_path.is_empty() {
            let DirFd::Fd(fd) = old_dirfd else {
                return Err(FsError::BadFileDescriptor);
            };
            let file = task.file(fd)?;
            return self.link_to(task, file.dirent(), new_dirfd, new_path.as_str());
        }
        self.file_op_on(task, old_dirfd, old_path.as_str(), follow, |_root, target, _| {
            self.link_to(task, target, new_dirfd, new_path.as_str())
        })
    }

    pub fn link(&self, task: &Task, old_path: &str, new_path: &str) -> FsResult<()> {
        self.link_at(task, DirFd::Cwd, old_path, DirFd::Cwd, new_path, 0)
    }

    fn link_to(&self, task: &Task, target: &DirentRef, new_dirfd: DirFd, new_path: &str) -> FsResult<()> {
        if target.is_dir() {
            return Err(FsError::OperationNotPermitted);
        }
        let creds = task.credentials();
        policy::may_link(&creds, target)?;
        self.file_op_at(task, new_dirfd, new_path, |_root, parent, name, _| {
            if !parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;
            self.check_new_name(name)?;
            parent.inode().create_hard_link(parent, target, name)
        })
    }

    /// readlinkat(2). The result is cut to `size` bytes.
    pub fn readlink_at(&self, task: &Task, dirfd: DirFd, path: &str, size: i32) -> FsResult<Vec<u8>> {
        let path = self.parse_path(path, false)?;
        if path.dir_path() {
            return Err(FsError::NotFound);
        }
        if size <= 0 {
            return Err(FsError::InvalidArgument);
        }
        let creds = task.credentials();
        self.file_op_on(task, dirfd, path.as_str(), false, |_root, d, _| {
            d.inode().check_permission(&creds, PermMask::READ)?;
            let mut text = d.inode().readlink()?.into_bytes();
            text.truncate(size as usize);
            Ok(text)
        })
    }

    pub fn readlink(&self, task: &Task, path: &str, size: i32) -> FsResult<Vec<u8>> {
        self.readlink_at(task, DirFd::Cwd, path, size)
    }

    /// renameat(2)
    pub fn rename_at(
        &self,
        task: &Task,
        old_dirfd: DirFd,
        old_path: &str,
        new_dirfd: DirFd,
        new_path: &str,
    ) -> FsResult<()> {
        let new_path = self.parse_path(new_path, false)?;
        let old_path = self.parse_path(old_path, false)?;
        let creds = task.credentials();
        self.file_op_at(task, old_dirfd, old_path.as_str(), |_root, old_parent, old_name, _| {
            if !old_parent.is_dir() {
                return Err(FsError::NotADirectory);
            }
            if matches!(old_name, "" | "." | "..") {
                return Err(FsError::Busy);
            }
            self.file_op_at(task, new_dirfd, new_path.as_str(), |_root, new_parent, new_name, _| {
                if !new_parent.is_dir() {
                    return Err(FsError::NotADirectory);
                }
                if matches!(new_name, "" | "." | "..") {
                    return Err(FsError::Busy);
                }
                self.check_new_name(new_name)?;

                old_parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;
                new_parent.inode().check_permission(&creds, PermMask::WRITE_EXECUTE)?;

                let renamed = old_parent.inode().lookup(old_parent, old_name)?;
                policy::check_sticky(&creds, old_parent, &renamed)?;
                if new_parent.descendant_of(&renamed) {
                    return Err(FsError::InvalidArgument);
                }
                // Moving a directory rewrites its `..` entry.
                if renamed.is_dir() && !old_parent.same_node(new_parent) {
                    renamed.inode().check_permission(&creds, PermMask::WRITE)?;
                }

                let replaced = match new_parent.inode().lookup(new_parent, new_name) {
                    Ok(replaced) => Some(replaced),
                    Err(FsError::NotFound) => None,
                    Err(err) => return Err(err),
                };
                if let Some(replaced) = &replaced {
                    if replaced.same_node(&renamed) {
                        return Ok(());
                    }
                    policy::check_sticky(&creds, new_parent, replaced)?;
                    if old_parent.descendant_of(replaced) {
                        return Err(FsError::NotEmpty);
                    }
                    match (renamed.is_dir(), replaced.is_dir()) {
                        (true, false) => return Err(FsError::NotADirectory),
                        (false, true) => return Err(FsError::IsADirectory),
                        _ => {}
                    }
                }

                let replacement = replaced.is_some();
                drop(replaced);
                drop(renamed);
                old_parent
                    .inode()
                    .rename(old_parent, old_name, new_parent, new_name, replacement)
            })
        })
    }

    pub fn rename(&self, task: &Task, old_path: &str, new_path: &str) -> FsResult<()> {
        self.rename_at(task, DirFd::Cwd, old_path, DirFd::Cwd, new_path)
    }

    /// Sends SIGXFSZ and fails when `size` reaches the file-size limit.
    fn check_file_size_limit(&self, task: &Task, size: u64) -> FsResult<()> {
        if size >= task.file_size_limit() {
            tracing::debug!(size, "file size limit exceeded");
            task.send_signal(SignalInfo {
                signo: abi::SIGXFSZ,
            });
            return Err(FsError::FileTooLarge);
        }
        Ok(())
    }

    /// truncate(2)
    pub fn truncate(&self, task: &Task, path: &str, length: i64) -> FsResult<()> {
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        let path = self.parse_path(path, false)?;
        if path.dir_path() {
            return Err(FsError::InvalidArgument);
        }
        self.check_file_size_limit(task, length as u64)?;
        let creds = task.credentials();
        self.file_op_on(task, DirFd::Cwd, path.as_str(), true, |_root, d, _| {
            match d.kind() {
                NodeKind::Regular => {}
                NodeKind::Directory => return Err(FsError::IsADirectory),
                NodeKind::Symlink
                | NodeKind::Fifo
                | NodeKind::Socket
                | NodeKind::CharDevice
                | NodeKind::BlockDevice => return Err(FsError::InvalidArgument),
            }
            d.inode().check_permission(&creds, PermMask::WRITE)?;
            d.inode().truncate(length as u64)?;
            self.notify_modified(d);
            Ok(())
        })
    }

    /// ftruncate(2)
    pub fn ftruncate(&self, task: &Task, fd: i32, length: i64) -> FsResult<()> {
        let file = task.file(fd)?;
        if !file.flags().write {
            return Err(FsError::InvalidArgument);
        }
        if !file.dirent().kind().is_regular() {
            return Err(FsError::InvalidArgument);
        }
        if length < 0 {
            return Err(FsError::InvalidArgument);
        }
        self.check_file_size_limit(task, length as u64)?;
        file.dirent().inode().truncate(length as u64)?;
        self.notify_modified(file.dirent());
        Ok(())
    }

    /// fallocate(2). Only mode 0 (allocate and extend) is supported.
    pub fn fallocate(&self, task: &Task, fd: i32, mode: i32, offset: i64, len: i64) -> FsResult<()> {
        let file = task.file(fd)?;
        if offset < 0 || len <= 0 {
            return Err(FsError::InvalidArgument);
        }
        if mode != 0 {
            return Err(FsError::NotSupported);
        }
        if !file.flags().write {
            return Err(FsError::BadFileDescriptor);
        }
        match file.dirent().kind() {
            NodeKind::Regular => {}
            NodeKind::Fifo => return Err(FsError::IllegalSeek),
            NodeKind::Directory => return Err(FsError::IsADirectory),
            NodeKind::Symlink | NodeKind::Socket | NodeKind::CharDevice | NodeKind::BlockDevice => {
                return Err(FsError::NoSuchDevice);
            }
        }
        let end = offset.checked_add(len).ok_or(FsError::FileTooLarge)?;
        self.check_file_size_limit(task, end as u64)?;
        file.dirent().inode().allocate(offset as u64, len as u64)?;
        self.notify_modified(file.dirent());
        Ok(())
    }

    /// chdir(2)
    pub fn chdir(&self, task: &Task, path: &str) -> FsResult<()> {
        let path = self.parse_path(path, false)?;
        let creds = task.credentials();
        self.file_op_on(task, DirFd::Cwd, path.as_str(), true, |_root, d, _| {
            check_searchable_dir(&creds, d)?;
            task.fs().set_working_directory(d.clone());
            Ok(())
        })
    }

    /// fchdir(2)
    pub fn fchdir(&self, task: &Task, fd: i32) -> FsResult<()> {
        let file = task.file(fd)?;
        let creds = task.credentials();
        check_searchable_dir(&creds, file.dirent())?;
        task.fs().set_working_directory(file.dirent().clone());
        Ok(())
    }

    /// chroot(2). Needs `CAP_SYS_CHROOT`.
    pub fn chroot(&self, task: &Task, path: &str) -> FsResult<()> {
        let creds = task.credentials();
        if !creds.has_capability(Capability::SysChroot) {
            return Err(FsError::OperationNotPermitted);
        }
        let path = self.parse_path(path, false)?;
        self.file_op_on(task, DirFd::Cwd, path.as_str(), true, |_root, d, _| {
            check_searchable_dir(&creds, d)?;
            task.fs().set_root_directory(d.clone());
            Ok(())
        })
    }

    /// getcwd(2). `size` counts the terminating NUL.
    pub fn getcwd(&self, task: &Task, size: usize) -> FsResult<String> {
        let cwd = task.fs().working_directory();
        let root = task.fs().root_directory();
        let (name, reachable) = cwd.full_name(&root);
        let name = if reachable {
            name
        } else {
            format!("(unreachable){name}")
        };
        if name.len() >= size {
            return Err(FsError::OutOfRange);
        }
        Ok(name)
    }

    /// umask(2). Returns the previous mask.
    pub fn umask(&self, task: &Task, mask: u32) -> u32 {
        task.fs().swap_umask(mask)
    }
}

fn check_searchable_dir(creds: &Credentials, d: &DirentRef) -> FsResult<()> {
    if !d.is_dir() {
        return Err(FsError::NotADirectory);
    }
    d.inode().check_permission(creds, PermMask::EXECUTE)
}
