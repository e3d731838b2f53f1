// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Descriptor-level calls: close(2), the dup family and fcntl(2).

use crate::abi;
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::file::FileRef;
use crate::lock::{Flock, LockOwner, LockRange};
use crate::task::Task;
use crate::types::FdFlags;

/// A decoded fcntl(2) command and its argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FcntlCmd {
    /// `F_DUPFD`: lowest free descriptor at or above the hint.
    DupFd(i32),
    /// `F_DUPFD_CLOEXEC`
    DupFdCloexec(i32),
    GetFd,
    /// `F_SETFD` with `FD_*` bits.
    SetFd(u32),
    GetFl,
    /// `F_SETFL` with `O_*` bits.
    SetFl(u32),
    SetLk(Flock),
    SetLkw(Flock),
}

impl FcntlCmd {
    /// Decodes a raw command whose argument is an integer. Lock commands
    /// carry a structure and are built directly.
    pub fn from_raw(cmd: i32, arg: i64) -> FsResult<Self> {
        let int_arg = || i32::try_from(arg).map_err(|_| FsError::InvalidArgument);
        Ok(match cmd {
            abi::F_DUPFD => FcntlCmd::DupFd(int_arg()?),
            abi::F_DUPFD_CLOEXEC => FcntlCmd::DupFdCloexec(int_arg()?),
            abi::F_GETFD => FcntlCmd::GetFd,
            abi::F_SETFD => FcntlCmd::SetFd(arg as u32),
            abi::F_GETFL => FcntlCmd::GetFl,
            abi::F_SETFL => FcntlCmd::SetFl(arg as u32),
            _ => return Err(FsError::InvalidArgument),
        })
    }
}

impl FsDispatcher {
    /// Drops the task's record locks on `file`'s inode.
    fn release_record_locks(&self, task: &Task, file: &FileRef) {
        if let Some(locks) = file.dirent().inode().lock_context() {
            let owner = LockOwner::DescriptorTable(task.fd_table().id());
            locks.posix.unlock_region(owner, LockRange::WHOLE_FILE);
        }
    }

    /// close(2). Record locks the task holds on the file go with it.
    pub fn close(&self, task: &Task, fd: i32) -> FsResult<()> {
        let file = task.fd_table().remove(fd).ok_or(FsError::BadFileDescriptor)?;
        self.release_record_locks(task, &file);
        Ok(())
    }

    /// dup(2)
    pub fn dup(&self, task: &Task, fd: i32) -> FsResult<i32> {
        let file = task.file(fd)?;
        task.fd_table()
            .new_fd_from(0, file, FdFlags::default())
            .map_err(|_| FsError::TooManyOpenFiles)
    }

    /// dup2(2). Duplicating a descriptor onto itself only checks it.
    pub fn dup2(&self, task: &Task, old_fd: i32, new_fd: i32) -> FsResult<i32> {
        if old_fd == new_fd {
            task.file(old_fd)?;
            return Ok(new_fd);
        }
        self.dup3(task, old_fd, new_fd, 0)
    }

    /// dup3(2). `flags` may only carry `O_CLOEXEC`.
    pub fn dup3(&self, task: &Task, old_fd: i32, new_fd: i32, flags: u32) -> FsResult<i32> {
        if old_fd == new_fd || flags & !abi::O_CLOEXEC != 0 {
            return Err(FsError::InvalidArgument);
        }
        let file = task.file(old_fd)?;
        let fd_flags = FdFlags {
            close_on_exec: flags & abi::O_CLOEXEC != 0,
        };
        if let Some(displaced) = task.fd_table().new_fd_at(new_fd, file, fd_flags)? {
            self.release_record_locks(task, &displaced);
        }
        Ok(new_fd)
    }

    /// fcntl(2). Commands without a result return 0.
    pub fn fcntl(&self, task: &Task, fd: i32, cmd: FcntlCmd) -> FsResult<i32> {
        let (file, fd_flags) = task.fd_table().get(fd).ok_or(FsError::BadFileDescriptor)?;
        match cmd {
            FcntlCmd::DupFd(from) | FcntlCmd::DupFdCloexec(from) => {
                if from < 0 {
                    return Err(FsError::InvalidArgument);
                }
                let flags = FdFlags {
                    close_on_exec: matches!(cmd, FcntlCmd::DupFdCloexec(_)),
                };
                task.fd_table().new_fd_from(from, file, flags)
            }
            FcntlCmd::GetFd => Ok(fd_flags.to_linux() as i32),
            FcntlCmd::SetFd(bits) => {
                let flags = FdFlags {
                    close_on_exec: bits & abi::FD_CLOEXEC != 0,
                };
                task.fd_table().set_flags(fd, flags).map(|()| 0)
            }
            FcntlCmd::GetFl => Ok(file.flags().to_linux() as i32),
            FcntlCmd::SetFl(bits) => {
                file.set_flags(file.flags().with_status(bits));
                Ok(0)
            }
            FcntlCmd::SetLk(flock) => self.fcntl_lock(task, fd, &flock, false).map(|()| 0),
            FcntlCmd::SetLkw(flock) => self.fcntl_lock(task, fd, &flock, true).map(|()| 0),
        }
    }
}
