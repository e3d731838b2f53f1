// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection for backend mutations.
//!
//! A [`FaultInjector`] holds a [`FaultPolicy`] and decides, per call, whether
//! a backend operation should fail with a synthetic error instead of running.

use crate::error::FsError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Backend operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Create,
    Mkdir,
    Link,
    Remove,
    Rename,
    Truncate,
    Allocate,
    SetAttr,
}

/// Errors a rule can inject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultErrno {
    Eio,
    Enospc,
    Eacces,
    Eexist,
}

impl FaultErrno {
    fn to_error(self) -> FsError {
        match self {
            FaultErrno::Eio => FsError::Io,
            FaultErrno::Enospc => FsError::NoSpace,
            FaultErrno::Eacces => FsError::PermissionDenied,
            FaultErrno::Eexist => FsError::AlreadyExists,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    pub errno: FaultErrno,
    /// Matching calls to let through before the first failure.
    #[serde(default)]
    pub start_after: u64,
    /// Stop failing after this many injected errors.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether any rule can fire.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
struct RuleCounters {
    hits: u64,
    invocations: u64,
}

#[derive(Clone, Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime controller that tracks the policy and per-rule hit counts.
#[derive(Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state();
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn clear(&self) {
        self.set_policy(FaultPolicy::default());
    }

    /// The error to inject for this call of `op`, if any. The first matching
    /// rule that is past its warm-up and under its cap wins.
    pub fn should_fault(&self, op: FaultOp) -> Option<FsError> {
        let mut guard = self.state();
        let FaultState { policy, counters } = &mut *guard;
        if !policy.enabled {
            return None;
        }
        for (rule, counter) in policy.rules.iter().zip(counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counter.invocations = counter.invocations.saturating_add(1);
            if counter.invocations <= rule.start_after {
                continue;
            }
            if rule.max_faults.is_some_and(|max| counter.hits >= max) {
                continue;
            }
            counter.hits = counter.hits.saturating_add(1);
            tracing::debug!(?op, errno = ?rule.errno, "injecting fault");
            return Some(rule.errno.to_error());
        }
        None
    }
}
