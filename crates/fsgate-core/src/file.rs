// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file handles.

use crate::lock::{LockOwner, LockRange};
use crate::node::DirentRef;
use crate::types::FileFlags;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identity of an open file; keys BSD locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub u64);

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// An open file description. Holds its dirent for as long as it lives.
pub struct File {
    id: FileId,
    dirent: DirentRef,
    flags: Mutex<FileFlags>,
    offset: AtomicI64,
}

pub type FileRef = Arc<File>;

impl File {
    pub fn new(dirent: DirentRef, flags: FileFlags) -> FileRef {
        Arc::new(File {
            id: FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)),
            dirent,
            flags: Mutex::new(flags),
            offset: AtomicI64::new(0),
        })
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn dirent(&self) -> &DirentRef {
        &self.dirent
    }

    pub fn flags(&self) -> FileFlags {
        *self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_flags(&self, flags: FileFlags) {
        *self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = flags;
    }

    /// Current seek offset. Read without coordination with concurrent seeks.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::Relaxed);
    }
}

impl Drop for File {
    fn drop(&mut self) {
        // BSD locks belong to the open file and end with it.
        if let Some(locks) = self.dirent.inode().lock_context() {
            locks
                .bsd
                .unlock_region(LockOwner::OpenFile(self.id), LockRange::WHOLE_FILE);
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("dirent", &self.dirent)
            .field("flags", &self.flags())
            .finish()
    }
}
