// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Advisory locks: fcntl(2) record locks and flock(2).
//!
//! Both families go through the same [`AdvisoryLocks`] interface. POSIX
//! locks are owned by the descriptor table, BSD locks by the open file, and
//! BSD locks always cover the whole file.

use crate::abi;
use crate::dispatch::FsDispatcher;
use crate::error::{FsError, FsResult};
use crate::file::FileId;
use crate::task::Task;
use crate::types::NodeKind;
use std::sync::Arc;

/// End-of-range sentinel meaning "to the end of the file, however large".
pub const LOCK_EOF: u64 = u64::MAX;

/// Half-open byte range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockRange {
    pub start: u64,
    pub end: u64,
}

impl LockRange {
    pub const WHOLE_FILE: LockRange = LockRange {
        start: 0,
        end: LOCK_EOF,
    };

    /// Range for an fcntl lock request with `start` and `len` relative to
    /// `offset` (the position selected by `l_whence`).
    pub fn compute(start: i64, len: i64, offset: i64) -> FsResult<LockRange> {
        let mut begin = offset.checked_add(start).ok_or(FsError::Overflow)?;
        if begin < 0 {
            return Err(FsError::InvalidArgument);
        }
        let end = match len {
            0 => LOCK_EOF,
            len if len > 0 => begin.checked_add(len).ok_or(FsError::Overflow)? as u64,
            len => {
                // Negative lengths cover [begin + len, begin).
                let signed_end = begin;
                begin = begin.checked_add(len).ok_or(FsError::Overflow)?;
                if begin < 0 {
                    return Err(FsError::InvalidArgument);
                }
                signed_end as u64
            }
        };
        Ok(LockRange {
            start: begin as u64,
            end,
        })
    }

    pub fn overlaps(&self, other: &LockRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &LockRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockOwner {
    /// POSIX record locks, one owner per descriptor table.
    DescriptorTable(u64),
    /// BSD locks, one owner per open file description.
    OpenFile(FileId),
}

/// Something that can be woken out of a blocking wait.
pub trait Blocker: Send + Sync {
    fn interrupted(&self) -> bool;
}

/// A lock table for one inode and one lock family.
pub trait AdvisoryLocks: Send + Sync {
    /// Acquires `range` for `owner`. Without a blocker this never waits and
    /// returns `false` on conflict; with one it waits until the lock is
    /// granted or the blocker reports an interruption.
    fn lock_region(
        &self,
        owner: LockOwner,
        kind: LockKind,
        range: LockRange,
        blocker: Option<&dyn Blocker>,
    ) -> bool;

    fn unlock_region(&self, owner: LockOwner, range: LockRange);
}

/// The two lock families of an inode.
#[derive(Clone)]
pub struct LockContext {
    pub posix: Arc<dyn AdvisoryLocks>,
    pub bsd: Arc<dyn AdvisoryLocks>,
}

/// `struct flock` as passed to fcntl(2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flock {
    pub l_type: i16,
    pub l_whence: i16,
    pub l_start: i64,
    pub l_len: i64,
}

impl FsDispatcher {
    /// fcntl(2) `F_SETLK` (`blocking == false`) and `F_SETLKW`.
    pub fn fcntl_lock(&self, task: &Task, fd: i32, flock: &Flock, blocking: bool) -> FsResult<()> {
        let file = task.file(fd)?;
        let dirent = file.dirent();
        let inode = dirent.inode();
        match dirent.kind() {
            NodeKind::Regular | NodeKind::Directory => {}
            NodeKind::Symlink
            | NodeKind::Fifo
            | NodeKind::Socket
            | NodeKind::CharDevice
            | NodeKind::BlockDevice => return Err(FsError::BadFileDescriptor),
        }

        // The offset is sampled without holding anything that orders it
        // against concurrent seeks or writes.
        let offset = match flock.l_whence {
            abi::SEEK_SET => 0,
            abi::SEEK_CUR => file.offset(),
            abi::SEEK_END => {
                let size = inode.unstable_attr()?.size;
                i64::try_from(size).map_err(|_| FsError::Overflow)?
            }
            _ => return Err(FsError::InvalidArgument),
        };
        let range = LockRange::compute(flock.l_start, flock.l_len, offset)?;

        let locks = inode.lock_context().ok_or(FsError::NotSupported)?;
        let owner = LockOwner::DescriptorTable(task.fd_table().id());
        let flags = file.flags();
        let kind = match flock.l_type {
            abi::F_RDLCK if flags.read => LockKind::Shared,
            abi::F_WRLCK if flags.write => LockKind::Exclusive,
            abi::F_RDLCK | abi::F_WRLCK => return Err(FsError::BadFileDescriptor),
            abi::F_UNLCK => {
                locks.posix.unlock_region(owner, range);
                return Ok(());
            }
            _ => return Err(FsError::InvalidArgument),
        };

        let blocker: Option<&dyn Blocker> = if blocking { Some(task) } else { None };
        if locks.posix.lock_region(owner, kind, range, blocker) {
            return Ok(());
        }
        tracing::debug!(fd, ?range, ?kind, blocking, "record lock not granted");
        Err(if blocking {
            FsError::Interrupted
        } else {
            FsError::WouldBlock
        })
    }

    /// flock(2).
    pub fn flock(&self, task: &Task, fd: i32, operation: i32) -> FsResult<()> {
        let file = task.file(fd)?;
        let non_blocking = operation & abi::LOCK_NB != 0;
        let operation = operation & !abi::LOCK_NB;

        let kind = match operation {
            abi::LOCK_EX => LockKind::Exclusive,
            abi::LOCK_SH => LockKind::Shared,
            abi::LOCK_UN => {
                let locks = file.dirent().inode().lock_context().ok_or(FsError::NotSupported)?;
                locks.bsd.unlock_region(LockOwner::OpenFile(file.id()), LockRange::WHOLE_FILE);
                return Ok(());
            }
            _ => return Err(FsError::InvalidArgument),
        };

        let locks = file.dirent().inode().lock_context().ok_or(FsError::NotSupported)?;
        let blocker: Option<&dyn Blocker> = if non_blocking { None } else { Some(task) };
        if locks.bsd.lock_region(
            LockOwner::OpenFile(file.id()),
            kind,
            LockRange::WHOLE_FILE,
            blocker,
        ) {
            return Ok(());
        }
        tracing::debug!(fd, ?kind, non_blocking, "flock not granted");
        Err(if non_blocking {
            FsError::WouldBlock
        } else {
            FsError::Interrupted
        })
    }
}
