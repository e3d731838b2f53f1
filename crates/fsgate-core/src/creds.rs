// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Credentials snapshots and user-namespace id mapping.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kernel-wide user id (the id after user-namespace translation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kuid(pub u32);

/// Kernel-wide group id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kgid(pub u32);

/// Sentinel for "no id" / "leave unchanged".
pub const NO_ID: u32 = u32::MAX;

impl Kuid {
    pub const ROOT: Kuid = Kuid(0);
    pub const NONE: Kuid = Kuid(NO_ID);

    pub fn is_valid(self) -> bool {
        self.0 != NO_ID
    }
}

impl Kgid {
    pub const ROOT: Kgid = Kgid(0);
    pub const NONE: Kgid = Kgid(NO_ID);

    pub fn is_valid(self) -> bool {
        self.0 != NO_ID
    }
}

/// Linux capabilities consulted by the filesystem layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chown,
    DacOverride,
    DacReadSearch,
    Fowner,
    Fsetid,
    SysChroot,
    Mknod,
}

impl Capability {
    /// Linux capability number.
    pub fn number(self) -> u32 {
        match self {
            Capability::Chown => 0,
            Capability::DacOverride => 1,
            Capability::DacReadSearch => 2,
            Capability::Fowner => 3,
            Capability::Fsetid => 4,
            Capability::SysChroot => 18,
            Capability::Mknod => 27,
        }
    }
}

/// Bit set of capabilities, indexed by [`Capability::number`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(pub u64);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);
    /// All capabilities up to `CAP_LAST_CAP` (40).
    pub const ALL: CapabilitySet = CapabilitySet((1 << 41) - 1);

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::EMPTY, |set, cap| set.with(*cap))
    }

    pub fn with(self, cap: Capability) -> Self {
        CapabilitySet(self.0 | (1 << cap.number()))
    }

    pub fn contains(self, cap: Capability) -> bool {
        self.0 & (1 << cap.number()) != 0
    }
}

/// One line of a `uid_map`/`gid_map`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub first_id: u32,
    pub first_kernel_id: u32,
    pub length: u32,
}

/// A user namespace with its id mappings.
#[derive(Debug)]
pub struct UserNamespace {
    parent: Option<Arc<UserNamespace>>,
    owner: Kuid,
    uid_map: Vec<IdMapEntry>,
    gid_map: Vec<IdMapEntry>,
}

impl UserNamespace {
    /// The initial namespace, with identity mappings.
    pub fn root() -> Arc<Self> {
        let identity = IdMapEntry {
            first_id: 0,
            first_kernel_id: 0,
            length: NO_ID,
        };
        Arc::new(Self {
            parent: None,
            owner: Kuid::ROOT,
            uid_map: vec![identity],
            gid_map: vec![identity],
        })
    }

    pub fn new_child(
        parent: &Arc<UserNamespace>,
        owner: Kuid,
        uid_map: Vec<IdMapEntry>,
        gid_map: Vec<IdMapEntry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent.clone()),
            owner,
            uid_map,
            gid_map,
        })
    }

    pub fn parent(&self) -> Option<&Arc<UserNamespace>> {
        self.parent.as_ref()
    }

    /// The initial namespace `ns` descends from.
    pub fn initial(ns: &Arc<UserNamespace>) -> Arc<UserNamespace> {
        let mut current = ns;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    /// Translates a namespace-local uid; unmapped ids become [`Kuid::NONE`].
    pub fn map_to_kuid(&self, uid: u32) -> Kuid {
        Kuid(map_forward(&self.uid_map, uid).unwrap_or(NO_ID))
    }

    pub fn map_to_kgid(&self, gid: u32) -> Kgid {
        Kgid(map_forward(&self.gid_map, gid).unwrap_or(NO_ID))
    }

    /// Namespace-local view of a kernel uid, if it is mapped here.
    pub fn map_from_kuid(&self, kuid: Kuid) -> Option<u32> {
        map_backward(&self.uid_map, kuid.0)
    }

    pub fn map_from_kgid(&self, kgid: Kgid) -> Option<u32> {
        map_backward(&self.gid_map, kgid.0)
    }
}

fn map_forward(map: &[IdMapEntry], id: u32) -> Option<u32> {
    if id == NO_ID {
        return None;
    }
    map.iter().find_map(|e| {
        let offset = id.checked_sub(e.first_id)?;
        if offset < e.length {
            e.first_kernel_id.checked_add(offset)
        } else {
            None
        }
    })
}

fn map_backward(map: &[IdMapEntry], kid: u32) -> Option<u32> {
    if kid == NO_ID {
        return None;
    }
    map.iter().find_map(|e| {
        let offset = kid.checked_sub(e.first_kernel_id)?;
        if offset < e.length {
            e.first_id.checked_add(offset)
        } else {
            None
        }
    })
}

/// Immutable credentials snapshot of a task.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub real_kuid: Kuid,
    pub effective_kuid: Kuid,
    pub saved_kuid: Kuid,
    pub real_kgid: Kgid,
    pub effective_kgid: Kgid,
    pub saved_kgid: Kgid,
    pub extra_kgids: Vec<Kgid>,
    pub permitted_caps: CapabilitySet,
    pub effective_caps: CapabilitySet,
    pub user_namespace: Arc<UserNamespace>,
}

impl Credentials {
    /// Root in the initial namespace with every capability.
    pub fn root() -> Self {
        Self::with_ids(Kuid::ROOT, Kgid::ROOT, CapabilitySet::ALL)
    }

    /// Unprivileged user in the initial namespace.
    pub fn user(uid: u32, gid: u32) -> Self {
        Self::with_ids(Kuid(uid), Kgid(gid), CapabilitySet::EMPTY)
    }

    fn with_ids(uid: Kuid, gid: Kgid, caps: CapabilitySet) -> Self {
        Self {
            real_kuid: uid,
            effective_kuid: uid,
            saved_kuid: uid,
            real_kgid: gid,
            effective_kgid: gid,
            saved_kgid: gid,
            extra_kgids: Vec::new(),
            permitted_caps: caps,
            effective_caps: caps,
            user_namespace: UserNamespace::root(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Kgid>) -> Self {
        self.extra_kgids = groups.into_iter().collect();
        self
    }

    pub fn with_capabilities(mut self, caps: CapabilitySet) -> Self {
        self.permitted_caps = caps;
        self.effective_caps = caps;
        self
    }

    pub fn in_group(&self, kgid: Kgid) -> bool {
        self.effective_kgid == kgid || self.extra_kgids.contains(&kgid)
    }

    /// Capability held in the credentials' own user namespace.
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.has_capability_in(cap, &self.user_namespace)
    }

    /// Capability held with respect to `ns`.
    ///
    /// Effective capabilities apply to the credentials' namespace and its
    /// descendants; the owner of a child namespace holds everything in it.
    pub fn has_capability_in(&self, cap: Capability, ns: &Arc<UserNamespace>) -> bool {
        let mut current = Some(ns);
        while let Some(candidate) = current {
            if Arc::ptr_eq(candidate, &self.user_namespace) {
                return self.effective_caps.contains(cap);
            }
            if let Some(parent) = candidate.parent() {
                if Arc::ptr_eq(parent, &self.user_namespace)
                    && candidate.owner == self.effective_kuid
                {
                    return true;
                }
            }
            current = candidate.parent();
        }
        false
    }

    /// The view `access(2)` checks with: effective ids replaced by the real
    /// ids, and the permitted set as effective capabilities only when the real
    /// uid is root inside the namespace.
    pub fn for_access_check(&self) -> Credentials {
        let mut view = self.clone();
        view.effective_kuid = self.real_kuid;
        view.effective_kgid = self.real_kgid;
        view.effective_caps = if self.user_namespace.map_from_kuid(self.real_kuid) == Some(0) {
            self.permitted_caps
        } else {
            CapabilitySet::EMPTY
        };
        view
    }
}
