// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for fsgate

use crate::abi;
use std::io;

/// Core filesystem error type
///
/// Every variant corresponds to exactly one guest-visible errno, see
/// [`FsError::errno`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("device or resource busy")]
    Busy,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not permitted")]
    OperationNotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many levels of symbolic links")]
    TooManySymlinks,
    #[error("file name too long")]
    NameTooLong,
    #[error("no such process")]
    NoSuchProcess,
    #[error("file too large")]
    FileTooLarge,
    #[error("resource temporarily unavailable")]
    WouldBlock,
    #[error("interrupted")]
    Interrupted,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("operation not supported")]
    NotSupported,
    #[error("no such device")]
    NoSuchDevice,
    #[error("illegal seek")]
    IllegalSeek,
    #[error("value too large for defined data type")]
    Overflow,
    #[error("result out of range")]
    OutOfRange,
    #[error("bad address")]
    BadAddress,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("no space left")]
    NoSpace,
    #[error("io error")]
    Io,
    /// Host error with no dedicated variant, carrying the guest errno.
    #[error("host error (errno {0})")]
    Host(i32),
}

impl FsError {
    /// The Linux errno reported to the guest.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => abi::ENOENT,
            FsError::AlreadyExists => abi::EEXIST,
            FsError::NotADirectory => abi::ENOTDIR,
            FsError::IsADirectory => abi::EISDIR,
            FsError::NotEmpty => abi::ENOTEMPTY,
            FsError::Busy => abi::EBUSY,
            FsError::PermissionDenied => abi::EACCES,
            FsError::OperationNotPermitted => abi::EPERM,
            FsError::InvalidArgument => abi::EINVAL,
            FsError::TooManySymlinks => abi::ELOOP,
            FsError::NameTooLong => abi::ENAMETOOLONG,
            FsError::NoSuchProcess => abi::ESRCH,
            FsError::FileTooLarge => abi::EFBIG,
            FsError::WouldBlock => abi::EAGAIN,
            FsError::Interrupted => abi::EINTR,
            FsError::BadFileDescriptor => abi::EBADF,
            FsError::NotSupported => abi::EOPNOTSUPP,
            FsError::NoSuchDevice => abi::ENODEV,
            FsError::IllegalSeek => abi::ESPIPE,
            FsError::Overflow => abi::EOVERFLOW,
            FsError::OutOfRange => abi::ERANGE,
            FsError::BadAddress => abi::EFAULT,
            FsError::TooManyOpenFiles => abi::EMFILE,
            FsError::NoSpace => abi::ENOSPC,
            FsError::Io => abi::EIO,
            FsError::Host(errno) => *errno,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        let Some(code) = err.raw_os_error() else {
            return match err.kind() {
                io::ErrorKind::NotFound => FsError::NotFound,
                io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
                io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
                io::ErrorKind::InvalidInput => FsError::InvalidArgument,
                io::ErrorKind::Interrupted => FsError::Interrupted,
                io::ErrorKind::WouldBlock => FsError::WouldBlock,
                _ => FsError::Io,
            };
        };
        // Host errno numbering differs between platforms; go through libc.
        match code {
            libc::ENOENT => FsError::NotFound,
            libc::EEXIST => FsError::AlreadyExists,
            libc::ENOTDIR => FsError::NotADirectory,
            libc::EISDIR => FsError::IsADirectory,
            libc::ENOTEMPTY => FsError::NotEmpty,
            libc::EBUSY => FsError::Busy,
            libc::EACCES => FsError::PermissionDenied,
            libc::EPERM => FsError::OperationNotPermitted,
            libc::EINVAL => FsError::InvalidArgument,
            libc::ELOOP => FsError::TooManySymlinks,
            libc::ENAMETOOLONG => FsError::NameTooLong,
            libc::EFBIG => FsError::FileTooLarge,
            libc::EAGAIN => FsError::WouldBlock,
            libc::EINTR => FsError::Interrupted,
            libc::EBADF => FsError::BadFileDescriptor,
            libc::ENOSPC => FsError::NoSpace,
            libc::ENODEV => FsError::NoSuchDevice,
            libc::ESPIPE => FsError::IllegalSeek,
            libc::EOVERFLOW => FsError::Overflow,
            libc::EMFILE => FsError::TooManyOpenFiles,
            libc::EIO => FsError::Io,
            _ => FsError::Io,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
