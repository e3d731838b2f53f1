// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Permission, ownership and capability rules.
//!
//! Everything here takes credentials explicitly. Callers that need a
//! different view (access(2)) derive it with
//! [`Credentials::for_access_check`] and pass that instead.

use crate::creds::{Capability, Credentials, Kgid, Kuid};
use crate::error::{FsError, FsResult};
use crate::node::{DirentRef, Inode};
use crate::types::{FileOwner, NodeKind, PermMask, TimestampUpdate, UnstableAttr};

/// Mode-bit check with capability overrides.
pub fn generic_check(
    creds: &Credentials,
    kind: NodeKind,
    attr: &UnstableAttr,
    mask: PermMask,
) -> FsResult<()> {
    let granted = if attr.owner.uid == creds.effective_kuid {
        attr.perms.user()
    } else if creds.in_group(attr.owner.gid) {
        attr.perms.group()
    } else {
        attr.perms.other()
    };
    if granted.superset_of(mask) {
        return Ok(());
    }

    let dac_override = capable_wrt(creds, attr, Capability::DacOverride);
    let read_search = capable_wrt(creds, attr, Capability::DacReadSearch);
    if kind.is_dir() {
        if dac_override {
            return Ok(());
        }
        if !mask.write && read_search {
            return Ok(());
        }
    }
    // Execute is only overridable when some execute bit is set.
    if dac_override && (!mask.execute || attr.perms.any_execute()) {
        return Ok(());
    }
    if mask.only_read() && read_search {
        return Ok(());
    }
    Err(FsError::PermissionDenied)
}

/// `cap` held over a node: the credentials' namespace must map both owner ids.
pub fn capable_wrt(creds: &Credentials, attr: &UnstableAttr, cap: Capability) -> bool {
    creds.user_namespace.map_from_kuid(attr.owner.uid).is_some()
        && creds.user_namespace.map_from_kgid(attr.owner.gid).is_some()
        && creds.has_capability(cap)
}

pub fn check_capability(creds: &Credentials, inode: &dyn Inode, cap: Capability) -> bool {
    inode
        .unstable_attr()
        .map(|attr| capable_wrt(creds, &attr, cap))
        .unwrap_or(false)
}

/// Owner of the node, or `CAP_FOWNER` with the owner mapped.
pub fn check_ownership(creds: &Credentials, inode: &dyn Inode) -> bool {
    let Ok(attr) = inode.unstable_attr() else {
        return false;
    };
    if attr.owner.uid == creds.effective_kuid {
        return true;
    }
    creds.has_capability(Capability::Fowner)
        && creds.user_namespace.map_from_kuid(attr.owner.uid).is_some()
}

/// Sticky-directory rule: only the owner of the directory, the owner of the
/// victim, or `CAP_FOWNER` may remove or rename entries.
pub fn check_sticky(creds: &Credentials, dir: &DirentRef, victim: &DirentRef) -> FsResult<()> {
    let dir_attr = dir.inode().unstable_attr()?;
    if !dir_attr.perms.sticky() || dir_attr.owner.uid == creds.effective_kuid {
        return Ok(());
    }
    let victim_attr = victim.inode().unstable_attr()?;
    if victim_attr.owner.uid == creds.effective_kuid {
        return Ok(());
    }
    if capable_wrt(creds, &victim_attr, Capability::Fowner) {
        return Ok(());
    }
    Err(FsError::OperationNotPermitted)
}

/// Checks that `name` may be removed from `dir` and returns the victim.
pub fn may_delete(creds: &Credentials, dir: &DirentRef, name: &str) -> FsResult<DirentRef> {
    dir.inode().check_permission(creds, PermMask::WRITE_EXECUTE)?;
    let victim = dir.inode().lookup(dir, name)?;
    check_sticky(creds, dir, &victim)?;
    Ok(victim)
}

/// Hardened hardlinks: non-owners may only link regular files they can read
/// and write.
pub fn may_link(creds: &Credentials, target: &DirentRef) -> FsResult<()> {
    if check_ownership(creds, target.inode()) {
        return Ok(());
    }
    if !target.kind().is_regular() {
        return Err(FsError::OperationNotPermitted);
    }
    target
        .inode()
        .check_permission(creds, PermMask::READ_WRITE)
        .map_err(|_| FsError::OperationNotPermitted)
}

/// What a permitted chown will change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChownPlan {
    /// New owner; invalid ids leave that half unchanged.
    pub owner: FileOwner,
    /// Whether setuid/setgid must be dropped afterwards.
    pub clear_privilege: bool,
}

/// Validates a chown request. `uid`/`gid` are namespace-local ids.
pub fn plan_chown(
    creds: &Credentials,
    attr: &UnstableAttr,
    uid: Option<u32>,
    gid: Option<u32>,
) -> FsResult<ChownPlan> {
    let has_cap = capable_wrt(creds, attr, Capability::Chown);
    let is_owner = attr.owner.uid == creds.effective_kuid;
    let mut plan = ChownPlan {
        owner: FileOwner {
            uid: Kuid::NONE,
            gid: Kgid::NONE,
        },
        clear_privilege: false,
    };

    if let Some(uid) = uid {
        let kuid = creds.user_namespace.map_to_kuid(uid);
        if !kuid.is_valid() {
            return Err(FsError::InvalidArgument);
        }
        let is_noop = attr.owner.uid == kuid;
        if !(has_cap || (is_owner && is_noop)) {
            return Err(FsError::OperationNotPermitted);
        }
        plan.owner.uid = kuid;
        plan.clear_privilege |= !is_noop;
    }

    if let Some(gid) = gid {
        let kgid = creds.user_namespace.map_to_kgid(gid);
        if !kgid.is_valid() {
            return Err(FsError::InvalidArgument);
        }
        let is_noop = attr.owner.gid == kgid;
        if !(has_cap || (is_owner && (is_noop || creds.in_group(kgid)))) {
            return Err(FsError::OperationNotPermitted);
        }
        plan.owner.gid = kgid;
        plan.clear_privilege |= !is_noop;
    }

    Ok(plan)
}

/// Non-owners may only set timestamps to "now", and need write access for it.
pub fn check_set_timestamps(
    creds: &Credentials,
    inode: &dyn Inode,
    update: &TimestampUpdate,
) -> FsResult<()> {
    if check_ownership(creds, inode) {
        return Ok(());
    }
    if update.has_explicit_time() {
        return Err(FsError::OperationNotPermitted);
    }
    inode.check_permission(creds, PermMask::WRITE)
}
