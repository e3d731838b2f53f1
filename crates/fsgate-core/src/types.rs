// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for fsgate

use crate::abi;
use crate::creds::{Kgid, Kuid};
use serde::{Deserialize, Serialize};

/// Stable inode identity within one backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(pub u64);

impl std::fmt::Display for InodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ino:{}", self.0)
    }
}

/// Node kind. Closed set; call sites that care match exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    CharDevice,
    BlockDevice,
}

impl NodeKind {
    /// Decodes the `S_IFMT` bits of a mode. A zero type means regular file,
    /// as accepted by mknod(2).
    pub fn from_mode(mode: u32) -> Option<NodeKind> {
        match mode & abi::S_IFMT {
            0 | abi::S_IFREG => Some(NodeKind::Regular),
            abi::S_IFDIR => Some(NodeKind::Directory),
            abi::S_IFLNK => Some(NodeKind::Symlink),
            abi::S_IFIFO => Some(NodeKind::Fifo),
            abi::S_IFSOCK => Some(NodeKind::Socket),
            abi::S_IFCHR => Some(NodeKind::CharDevice),
            abi::S_IFBLK => Some(NodeKind::BlockDevice),
            _ => None,
        }
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            NodeKind::Regular => abi::S_IFREG,
            NodeKind::Directory => abi::S_IFDIR,
            NodeKind::Symlink => abi::S_IFLNK,
            NodeKind::Fifo => abi::S_IFIFO,
            NodeKind::Socket => abi::S_IFSOCK,
            NodeKind::CharDevice => abi::S_IFCHR,
            NodeKind::BlockDevice => abi::S_IFBLK,
        }
    }

    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == NodeKind::Symlink
    }

    pub fn is_regular(self) -> bool {
        self == NodeKind::Regular
    }
}

/// Attributes that never change for the life of an inode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StableAttr {
    pub id: InodeId,
    pub kind: NodeKind,
    pub device: u64,
}

/// Requested permission bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermMask {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl PermMask {
    pub const READ: PermMask = PermMask {
        read: true,
        write: false,
        execute: false,
    };
    pub const WRITE: PermMask = PermMask {
        read: false,
        write: true,
        execute: false,
    };
    pub const EXECUTE: PermMask = PermMask {
        read: false,
        write: false,
        execute: true,
    };
    pub const WRITE_EXECUTE: PermMask = PermMask {
        read: false,
        write: true,
        execute: true,
    };
    pub const READ_WRITE: PermMask = PermMask {
        read: true,
        write: true,
        execute: false,
    };

    /// From the low three bits of a mode (`rwx`).
    pub fn from_bits(bits: u32) -> Self {
        Self {
            read: bits & 0o4 != 0,
            write: bits & 0o2 != 0,
            execute: bits & 0o1 != 0,
        }
    }

    /// From `access(2)` mode bits.
    pub fn from_access_mode(mode: u32) -> Self {
        Self {
            read: mode & abi::R_OK != 0,
            write: mode & abi::W_OK != 0,
            execute: mode & abi::X_OK != 0,
        }
    }

    /// Permissions implied by open(2) flags. `O_TRUNC` implies write.
    pub fn from_open_flags(flags: u32) -> Self {
        let mut mask = match flags & abi::O_ACCMODE {
            abi::O_WRONLY => PermMask::WRITE,
            abi::O_RDWR => PermMask::READ_WRITE,
            abi::O_RDONLY => PermMask::READ,
            _ => PermMask::default(),
        };
        if flags & abi::O_TRUNC != 0 {
            mask.write = true;
        }
        mask
    }

    pub fn superset_of(self, other: PermMask) -> bool {
        (self.read || !other.read)
            && (self.write || !other.write)
            && (self.execute || !other.execute)
    }

    pub fn only_read(self) -> bool {
        self.read && !self.write && !self.execute
    }
}

/// Permission bits of an inode, including setuid/setgid/sticky.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePerms(pub u32);

impl FilePerms {
    /// Keeps only the permission bits of a full mode.
    pub fn from_mode(mode: u32) -> Self {
        FilePerms(mode & abi::PERMS_MASK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn user(self) -> PermMask {
        PermMask::from_bits(self.0 >> 6)
    }

    pub fn group(self) -> PermMask {
        PermMask::from_bits(self.0 >> 3)
    }

    pub fn other(self) -> PermMask {
        PermMask::from_bits(self.0)
    }

    pub fn setuid(self) -> bool {
        self.0 & abi::S_ISUID != 0
    }

    pub fn setgid(self) -> bool {
        self.0 & abi::S_ISGID != 0
    }

    pub fn sticky(self) -> bool {
        self.0 & abi::S_ISVTX != 0
    }

    pub fn any_execute(self) -> bool {
        self.0 & 0o111 != 0
    }

    /// Clears setuid, and setgid when group execute is set. A setgid bit
    /// without group execute marks mandatory locking and is kept.
    pub fn drop_setuid_and_maybe_setgid(self) -> Self {
        let mut bits = self.0 & !abi::S_ISUID;
        if self.group().execute {
            bits &= !abi::S_ISGID;
        }
        FilePerms(bits)
    }
}

/// Owner of an inode. Invalid ids in a `set_owner` request mean "unchanged".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: Kuid,
    pub gid: Kgid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as i64,
            nsec: i64::from(elapsed.subsec_nanos()),
        }
    }
}

/// Inode timestamps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// Attributes that may change at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnstableAttr {
    pub size: u64,
    pub perms: FilePerms,
    pub owner: FileOwner,
    pub times: FileTimes,
    pub links: u64,
}

/// One half of a timestamp update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUpdate {
    Omit,
    Now,
    At(Timespec),
}

impl TimeUpdate {
    /// Decodes a `timespec` as passed to utimensat(2).
    pub fn from_timespec(ts: Timespec) -> Self {
        match ts.nsec {
            abi::UTIME_OMIT => TimeUpdate::Omit,
            abi::UTIME_NOW => TimeUpdate::Now,
            _ => TimeUpdate::At(ts),
        }
    }

    pub fn is_explicit(self) -> bool {
        matches!(self, TimeUpdate::At(_))
    }
}

/// Access/modification time update request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampUpdate {
    pub atime: TimeUpdate,
    pub mtime: TimeUpdate,
}

impl TimestampUpdate {
    pub const NOW: TimestampUpdate = TimestampUpdate {
        atime: TimeUpdate::Now,
        mtime: TimeUpdate::Now,
    };

    pub fn is_noop(&self) -> bool {
        self.atime == TimeUpdate::Omit && self.mtime == TimeUpdate::Omit
    }

    pub fn has_explicit_time(&self) -> bool {
        self.atime.is_explicit() || self.mtime.is_explicit()
    }
}

/// Status flags of an open file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub directory: bool,
    pub non_blocking: bool,
    pub sync: bool,
    pub dsync: bool,
    pub direct: bool,
    pub async_io: bool,
    pub large_file: bool,
}

impl FileFlags {
    pub fn from_linux(flags: u32) -> Self {
        let access = flags & abi::O_ACCMODE;
        Self {
            read: access != abi::O_WRONLY,
            write: access != abi::O_RDONLY,
            append: flags & abi::O_APPEND != 0,
            truncate: flags & abi::O_TRUNC != 0,
            directory: flags & abi::O_DIRECTORY != 0,
            non_blocking: flags & abi::O_NONBLOCK != 0,
            sync: flags & abi::O_SYNC == abi::O_SYNC,
            dsync: flags & abi::O_DSYNC != 0,
            direct: flags & abi::O_DIRECT != 0,
            async_io: flags & abi::O_ASYNC != 0,
            large_file: flags & abi::O_LARGEFILE != 0,
        }
    }

    /// Status flags as reported by `F_GETFL`.
    pub fn to_linux(self) -> u32 {
        let mut flags = match (self.read, self.write) {
            (true, true) => abi::O_RDWR,
            (false, true) => abi::O_WRONLY,
            _ => abi::O_RDONLY,
        };
        for (set, bit) in [
            (self.append, abi::O_APPEND),
            (self.directory, abi::O_DIRECTORY),
            (self.non_blocking, abi::O_NONBLOCK),
            (self.dsync, abi::O_DSYNC),
            (self.sync, abi::O_SYNC),
            (self.direct, abi::O_DIRECT),
            (self.async_io, abi::O_ASYNC),
            (self.large_file, abi::O_LARGEFILE),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }

    /// Applies `F_SETFL`: only append, non-blocking, direct and async
    /// follow `flags`, everything else is kept.
    pub fn with_status(self, flags: u32) -> Self {
        let requested = Self::from_linux(flags);
        Self {
            append: requested.append,
            non_blocking: requested.non_blocking,
            direct: requested.direct,
            async_io: requested.async_io,
            ..self
        }
    }
}

/// Per-descriptor flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FdFlags {
    pub close_on_exec: bool,
}

impl FdFlags {
    pub const CLOEXEC: FdFlags = FdFlags {
        close_on_exec: true,
    };

    /// As returned by `F_GETFD`.
    pub fn to_linux(self) -> u32 {
        if self.close_on_exec {
            abi::FD_CLOEXEC
        } else {
            0
        }
    }
}

/// Permissions and owner of a node about to be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewNodeAttrs {
    pub perms: FilePerms,
    pub owner: FileOwner,
}

/// A signal the core asks the task to receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalInfo {
    pub signo: i32,
}

/// Filesystem notifications, keyed by inode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsEvent {
    Opened { inode: InodeId, name: String },
    Modified { inode: InodeId, name: String },
    AttributesChanged { inode: InodeId, name: String },
}

impl FsEvent {
    pub fn inode(&self) -> InodeId {
        match self {
            FsEvent::Opened { inode, .. }
            | FsEvent::Modified { inode, .. }
            | FsEvent::AttributesChanged { inode, .. } => *inode,
        }
    }
}

/// Receives filesystem notifications.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn on_event(&self, evt: &FsEvent);
}

/// Opaque event subscription identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}
