// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Ownership, mode, timestamp and access checks.

use crate::abi;
use crate::creds::{Credentials, NO_ID};
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::node::DirentRef;
use crate::policy;
use crate::resolve::DirFd;
use crate::task::Task;
use crate::types::{FilePerms, PermMask, TimeUpdate, TimestampUpdate, Timespec};

/// `struct timeval` as passed to utimes(2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl FsDispatcher {
    fn chown_dirent(&self, creds: &Credentials, d: &DirentRef, uid: u32, gid: u32) -> FsResult<()> {
        let attr = d.inode().unstable_attr()?;
        let plan = policy::plan_chown(
            creds,
            &attr,
            (uid != NO_ID).then_some(uid),
            (gid != NO_ID).then_some(gid),
        )?;
        d.inode().set_owner(plan.owner)?;

        if plan.clear_privilege
            && (attr.perms.setuid() || attr.perms.setgid())
            && !d.is_dir()
        {
            d.inode()
                .set_permissions(attr.perms.drop_setuid_and_maybe_setgid())
                .map_err(|_| FsError::OperationNotPermitted)?;
        }
        self.notify_attributes_changed(d);
        Ok(())
    }

    /// fchownat(2). `uid`/`gid` of `NO_ID` (-1) leave that id unchanged.
    pub fn fchownat(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &str,
        uid: u32,
        gid: u32,
        flags: u32,
    ) -> FsResult<()> {
        if flags & !(abi::AT_EMPTY_PATH | abi::AT_SYMLINK_NOFOLLOW) != 0 {
            return Err(FsError::InvalidArgument);
        }
        let allow_empty = flags & abi::AT_EMPTY_PATH != 0;
        let follow = flags & abi::AT_SYMLINK_NOFOLLOW == 0;
        let path = self.parse_path(path, allow_empty)?;
        let creds = task.credentials();

        if path.is_empty() {
            let target = match dirfd {
                DirFd::Cwd => task.fs().working_directory(),
                DirFd::Fd(fd) => task.file(fd)?.dirent().clone(),
            };
            return self.chown_dirent(&creds, &target, uid, gid);
        }
        self.file_op_on(task, dirfd, path.as_str(), follow, |_root, d, _| {
            self.chown_dirent(&creds, d, uid, gid)
        })
    }

    pub fn chown(&self, task: &Task, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.fchownat(task, DirFd::Cwd, path, uid, gid, 0)
    }

    /// chown(2) without following a final symlink.
    pub fn lchown(&self, task: &Task, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.fchownat(task, DirFd::Cwd, path, uid, gid, abi::AT_SYMLINK_NOFOLLOW)
    }

    pub fn fchown(&self, task: &Task, fd: i32, uid: u32, gid: u32) -> FsResult<()> {
        let file = task.file(fd)?;
        self.chown_dirent(&task.credentials(), file.dirent(), uid, gid)
    }

    fn chmod_dirent(&self, creds: &Credentials, d: &DirentRef, mode: u32) -> FsResult<()> {
        if !policy::check_ownership(creds, d.inode()) {
            return Err(FsError::OperationNotPermitted);
        }
        d.inode()
            .set_permissions(FilePerms::from_mode(mode))
            .map_err(|_| FsError::OperationNotPermitted)?;
        self.notify_attributes_changed(d);
        Ok(())
    }

    /// fchmodat(2). Always follows a final symlink.
    pub fn fchmodat(&self, task: &Task, dirfd: DirFd, path: &str, mode: u32) -> FsResult<()> {
        let path = self.parse_path(path, false)?;
        let creds = task.credentials();
        self.file_op_on(task, dirfd, path.as_str(), true, |_root, d, _| {
            self.chmod_dirent(&creds, d, mode)
        })
    }

    pub fn chmod(&self, task: &Task, path: &str, mode: u32) -> FsResult<()> {
        self.fchmodat(task, DirFd::Cwd, path, mode)
    }

    pub fn fchmod(&self, task: &Task, fd: i32, mode: u32) -> FsResult<()> {
        let file = task.file(fd)?;
        self.chmod_dirent(&task.credentials(), file.dirent(), mode)
    }

    fn set_timestamps_on(&self, creds: &Credentials, d: &DirentRef, update: TimestampUpdate) -> FsResult<()> {
        policy::check_set_timestamps(creds, d.inode(), &update)?;
        d.inode().set_timestamps(update)?;
        self.notify_attributes_changed(d);
        Ok(())
    }

    fn update_times(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: Option<&str>,
        update: TimestampUpdate,
        follow: bool,
    ) -> FsResult<()> {
        let creds = task.credentials();
        let Some(path) = path else {
            // A null path names the descriptor itself.
            let DirFd::Fd(fd) = dirfd else {
                return Err(FsError::BadAddress);
            };
            if !follow {
                return Err(FsError::InvalidArgument);
            }
            let file = task.file(fd)?;
            return self.set_timestamps_on(&creds, file.dirent(), update);
        };
        let path = self.parse_path(path, false)?;
        self.file_op_on(task, dirfd, path.as_str(), follow, |_root, d, _| {
            self.set_timestamps_on(&creds, d, update)
        })
    }

    /// utimensat(2). `times` of `None` sets both timestamps to now.
    pub fn utimensat(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: Option<&str>,
        times: Option<[Timespec; 2]>,
        flags: u32,
    ) -> FsResult<()> {
        if flags & !abi::AT_SYMLINK_NOFOLLOW != 0 {
            return Err(FsError::InvalidArgument);
        }
        let update = match times {
            None => TimestampUpdate::NOW,
            Some([atime, mtime]) => {
                for ts in [atime, mtime] {
                    let special = ts.nsec == abi::UTIME_NOW || ts.nsec == abi::UTIME_OMIT;
                    if !special && !(0..1_000_000_000).contains(&ts.nsec) {
                        return Err(FsError::InvalidArgument);
                    }
                }
                TimestampUpdate {
                    atime: TimeUpdate::from_timespec(atime),
                    mtime: TimeUpdate::from_timespec(mtime),
                }
            }
        };
        if update.is_noop() {
            return Ok(());
        }
        let follow = flags & abi::AT_SYMLINK_NOFOLLOW == 0;
        self.update_times(task, dirfd, path, update, follow)
    }

    /// utimes(2), with microsecond precision.
    pub fn utimes(&self, task: &Task, path: &str, times: Option<[Timeval; 2]>) -> FsResult<()> {
        self.futimesat(task, DirFd::Cwd, path, times)
    }

    /// futimesat(2): utimes(2) relative to `dirfd`. Always follows symlinks.
    pub fn futimesat(
        &self,
        task: &Task,
        dirfd: DirFd,
        path: &str,
        times: Option<[Timeval; 2]>,
    ) -> FsResult<()> {
        let update = match times {
            None => TimestampUpdate::NOW,
            Some(times) => {
                let mut converted = [TimeUpdate::Now; 2];
                for (slot, tv) in converted.iter_mut().zip(times) {
                    if !(0..1_000_000).contains(&tv.usec) {
                        return Err(FsError::InvalidArgument);
                    }
                    *slot = TimeUpdate::At(Timespec {
                        sec: tv.sec,
                        nsec: tv.usec * 1000,
                    });
                }
                TimestampUpdate {
                    atime: converted[0],
                    mtime: converted[1],
                }
            }
        };
        self.update_times(task, dirfd, Some(path), update, true)
    }

    /// faccessat(2). Checks with the real ids unless `AT_EACCESS` is set.
    pub fn faccessat(&self, task: &Task, dirfd: DirFd, path: &str, mode: u32, flags: u32) -> FsResult<()> {
        if flags & !(abi::AT_SYMLINK_NOFOLLOW | abi::AT_EACCESS) != 0 {
            return Err(FsError::InvalidArgument);
        }
        if mode & !(abi::R_OK | abi::W_OK | abi::X_OK) != 0 {
            return Err(FsError::InvalidArgument);
        }
        let path = self.parse_path(path, false)?;
        let creds = if flags & abi::AT_EACCESS != 0 {
            task.credentials()
        } else {
            std::sync::Arc::new(task.credentials().for_access_check())
        };
        let follow = flags & abi::AT_SYMLINK_NOFOLLOW == 0;
        self.file_op_on(task, dirfd, path.as_str(), follow, |_root, d, _| {
            d.inode()
                .check_permission(&creds, PermMask::from_access_mode(mode))
        })
    }

    pub fn access(&self, task: &Task, path: &str, mode: u32) -> FsResult<()> {
        self.faccessat(task, DirFd::Cwd, path, mode, 0)
    }
}
