// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte-range lock table used for both lock families of a memfs inode.

use crate::lock::{AdvisoryLocks, Blocker, LockKind, LockOwner, LockRange};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often a blocked waiter rechecks its blocker for interruption.
const INTERRUPT_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug)]
struct HeldLock {
    owner: LockOwner,
    kind: LockKind,
    range: LockRange,
}

/// Locks held on one inode by one lock family.
///
/// An owner's new lock replaces whatever that owner held over the same
/// bytes, so upgrades, downgrades and partial unlocks split existing
/// entries.
#[derive(Default)]
pub struct RangeLockTable {
    held: Mutex<Vec<HeldLock>>,
    released: Condvar,
}

impl RangeLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, Vec<HeldLock>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of entries currently held, after splitting.
    pub fn len(&self) -> usize {
        self.held().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held().is_empty()
    }

    fn conflicts(held: &[HeldLock], owner: LockOwner, kind: LockKind, range: &LockRange) -> bool {
        held.iter().any(|lock| {
            lock.owner != owner
                && lock.range.overlaps(range)
                && (lock.kind == LockKind::Exclusive || kind == LockKind::Exclusive)
        })
    }

    /// Drops `owner`'s hold on `range`, keeping the parts outside it.
    fn carve(held: &mut Vec<HeldLock>, owner: LockOwner, range: &LockRange) {
        let mut kept = Vec::with_capacity(held.len());
        for lock in held.drain(..) {
            if lock.owner != owner || !lock.range.overlaps(range) {
                kept.push(lock);
                continue;
            }
            if lock.range.start < range.start {
                kept.push(HeldLock {
                    range: LockRange {
                        start: lock.range.start,
                        end: range.start,
                    },
                    ..lock
                });
            }
            if range.end < lock.range.end {
                kept.push(HeldLock {
                    range: LockRange {
                        start: range.end,
                        end: lock.range.end,
                    },
                    ..lock
                });
            }
        }
        *held = kept;
    }
}

impl AdvisoryLocks for RangeLockTable {
    fn lock_region(
        &self,
        owner: LockOwner,
        kind: LockKind,
        range: LockRange,
        blocker: Option<&dyn Blocker>,
    ) -> bool {
        let mut held = self.held();
        loop {
            if !Self::conflicts(&held, owner, kind, &range) {
                Self::carve(&mut held, owner, &range);
                held.push(HeldLock { owner, kind, range });
                return true;
            }
            let Some(blocker) = blocker else {
                return false;
            };
            if blocker.interrupted() {
                tracing::debug!(?owner, ?range, "lock wait interrupted");
                return false;
            }
            held = self
                .released
                .wait_timeout(held, INTERRUPT_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    fn unlock_region(&self, owner: LockOwner, range: LockRange) {
        let mut held = self.held();
        Self::carve(&mut held, owner, &range);
        drop(held);
        self.released.notify_all();
    }
}
