// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory backend.
//!
//! `MemFs` keeps every inode in one table behind a single mutex, which makes
//! each backend primitive atomic with respect to lookups. Dirents are built
//! on demand and count every reference taken on them in a ledger, so tests
//! can check that the dispatcher returns what it takes.
//!
//! A directory records the entry that links it into its parent, and its
//! dirents report that entry rather than the path they were found by, so
//! ancestry stays correct across renames. An inode leaves the table once it
//! has no links and no dirent refers to it.

mod locks;

pub use locks::RangeLockTable;

use crate::abi;
use crate::creds::{Kgid, Kuid};
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultOp};
use crate::file::{File, FileRef};
use crate::lock::LockContext;
use crate::node::{Dirent, DirentRef, Inode, SymlinkResolution};
use crate::types::{
    FileFlags, FileOwner, FilePerms, FileTimes, InodeId, NewNodeAttrs, NodeKind, StableAttr,
    TimeUpdate, TimestampUpdate, Timespec, UnstableAttr,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const ROOT_ID: InodeId = InodeId(1);

const ROOT_OWNER: FileOwner = FileOwner {
    uid: Kuid::ROOT,
    gid: Kgid::ROOT,
};

/// Device number reported for every memfs inode.
pub const MEMFS_DEVICE: u64 = 0x6d66;

enum Contents {
    Directory(BTreeMap<String, InodeId>),
    Symlink(String),
    /// A link that resolves to a node directly, without its text.
    DirectLink { text: String, target: InodeId },
    Other,
}

struct Node {
    kind: NodeKind,
    attr: UnstableAttr,
    contents: Contents,
    locks: Option<LockContext>,
    /// Parent and name of a linked directory. `None` for the root, for
    /// removed directories and for every other kind.
    dotdot: Option<(InodeId, String)>,
    /// Live dirent references to this inode.
    refs: Arc<AtomicU64>,
}

impl Node {
    fn new(kind: NodeKind, perms: FilePerms, owner: FileOwner, contents: Contents) -> Self {
        let now = Timespec::now();
        let locks = matches!(kind, NodeKind::Regular | NodeKind::Directory).then(|| LockContext {
            posix: Arc::new(RangeLockTable::new()),
            bsd: Arc::new(RangeLockTable::new()),
        });
        Self {
            kind,
            attr: UnstableAttr {
                size: 0,
                perms,
                owner,
                times: FileTimes {
                    atime: now,
                    mtime: now,
                    ctime: now,
                },
                links: if kind.is_dir() { 2 } else { 1 },
            },
            contents,
            locks,
            dotdot: None,
            refs: Arc::new(AtomicU64::new(0)),
        }
    }

    fn children(&self) -> FsResult<&BTreeMap<String, InodeId>> {
        match &self.contents {
            Contents::Directory(children) => Ok(children),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn children_mut(&mut self) -> FsResult<&mut BTreeMap<String, InodeId>> {
        match &mut self.contents {
            Contents::Directory(children) => Ok(children),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn touch_modified(&mut self) {
        let now = Timespec::now();
        self.attr.times.mtime = now;
        self.attr.times.ctime = now;
    }
}

#[derive(Default)]
struct RefLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

struct MemFsInner {
    nodes: Mutex<HashMap<InodeId, Node>>,
    next_id: AtomicU64,
    ledger: RefLedger,
    faults: FaultInjector,
    root_refs: Arc<AtomicU64>,
}

impl MemFsInner {
    fn nodes(&self) -> MutexGuard<'_, HashMap<InodeId, Node>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn inject(&self, op: FaultOp) -> FsResult<()> {
        match self.faults.should_fault(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn allocate_id(&self) -> InodeId {
        InodeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Builds a dirent for `id`. Runs with the table locked so the inode
    /// cannot be reclaimed before the reference is counted. Directories
    /// ignore `parent` and derive it from their `dotdot` entry.
    fn dirent(
        self: &Arc<Self>,
        nodes: &HashMap<InodeId, Node>,
        id: InodeId,
        name: &str,
        parent: Option<&DirentRef>,
    ) -> FsResult<DirentRef> {
        let node = nodes.get(&id).ok_or(FsError::NotFound)?;
        let parent = if node.kind.is_dir() { None } else { parent.cloned() };
        Ok(DirentRef::new(Arc::new(MemDirent {
            inode: MemInode {
                fs: self.clone(),
                id,
                kind: node.kind,
                refs: node.refs.clone(),
            },
            name: name.to_string(),
            parent,
        })))
    }

    /// Links a new node named `name` into directory `dir`.
    fn insert_child(
        self: &Arc<Self>,
        dir: &DirentRef,
        name: &str,
        mut node: Node,
    ) -> FsResult<DirentRef> {
        let mut nodes = self.nodes();
        let is_dir = node.kind.is_dir();
        let parent = nodes.get_mut(&dir.id()).ok_or(FsError::NotFound)?;
        let children = parent.children_mut()?;
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let id = self.allocate_id();
        children.insert(name.to_string(), id);
        if is_dir {
            parent.attr.links += 1;
            node.dotdot = Some((dir.id(), name.to_string()));
        }
        parent.touch_modified();
        nodes.insert(id, node);
        self.dirent(&nodes, id, name, Some(dir))
    }

    /// Frees `id` once it is unlinked and unreferenced.
    fn reclaim_if_unused(nodes: &mut HashMap<InodeId, Node>, id: InodeId) {
        let unused = nodes
            .get(&id)
            .is_some_and(|node| node.attr.links == 0 && node.refs.load(Ordering::SeqCst) == 0);
        if unused {
            nodes.remove(&id);
            tracing::trace!(id = id.0, "reclaimed inode");
        }
    }
}

/// An in-memory filesystem.
#[derive(Clone)]
pub struct MemFs {
    inner: Arc<MemFsInner>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// An empty filesystem whose root is a 0755 directory owned by root.
    pub fn new() -> Self {
        let root = Node::new(
            NodeKind::Directory,
            FilePerms(0o755),
            ROOT_OWNER,
            Contents::Directory(BTreeMap::new()),
        );
        let root_refs = root.refs.clone();
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, root);
        Self {
            inner: Arc::new(MemFsInner {
                nodes: Mutex::new(nodes),
                next_id: AtomicU64::new(ROOT_ID.0 + 1),
                ledger: RefLedger::default(),
                faults: FaultInjector::new(),
                root_refs,
            }),
        }
    }

    /// A fresh reference to the root directory.
    pub fn root_dirent(&self) -> DirentRef {
        DirentRef::new(Arc::new(MemDirent {
            inode: MemInode {
                fs: self.inner.clone(),
                id: ROOT_ID,
                kind: NodeKind::Directory,
                refs: self.inner.root_refs.clone(),
            },
            name: "/".to_string(),
            parent: None,
        }))
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// References acquired and not yet released.
    pub fn outstanding_refs(&self) -> u64 {
        let acquired = self.inner.ledger.acquired.load(Ordering::SeqCst);
        let released = self.inner.ledger.released.load(Ordering::SeqCst);
        acquired.saturating_sub(released)
    }

    /// Adds a symlink in `dir` that resolves straight to `target`. Reading it
    /// yields `text`.
    pub fn add_direct_link(&self, dir: &DirentRef, name: &str, text: &str, target: &DirentRef) -> FsResult<()> {
        if target.stable_attr().device != MEMFS_DEVICE {
            return Err(FsError::Host(abi::EXDEV));
        }
        let node = Node::new(
            NodeKind::Symlink,
            FilePerms(0o777),
            ROOT_OWNER,
            Contents::DirectLink {
                text: text.to_string(),
                target: target.id(),
            },
        );
        self.inner.insert_child(dir, name, node).map(drop)
    }

    /// Number of inodes still linked or referenced.
    pub fn inode_count(&self) -> usize {
        self.inner.nodes().len()
    }
}

/// Inode handle into a [`MemFs`].
pub struct MemInode {
    fs: Arc<MemFsInner>,
    id: InodeId,
    kind: NodeKind,
    refs: Arc<AtomicU64>,
}

impl MemInode {
    fn with_node<T>(&self, f: impl FnOnce(&mut Node) -> FsResult<T>) -> FsResult<T> {
        let mut nodes = self.fs.nodes();
        let node = nodes.get_mut(&self.id).ok_or(FsError::NotFound)?;
        f(node)
    }

    fn create_node(&self, dir: &DirentRef, name: &str, kind: NodeKind, attrs: NewNodeAttrs, contents: Contents) -> FsResult<DirentRef> {
        let node = Node::new(kind, attrs.perms, attrs.owner, contents);
        self.fs.insert_child(dir, name, node)
    }
}

impl Inode for MemInode {
    fn stable_attr(&self) -> StableAttr {
        StableAttr {
            id: self.id,
            kind: self.kind,
            device: MEMFS_DEVICE,
        }
    }

    fn unstable_attr(&self) -> FsResult<UnstableAttr> {
        self.with_node(|node| Ok(node.attr))
    }

    fn lookup(&self, dir: &DirentRef, name: &str) -> FsResult<DirentRef> {
        let nodes = self.fs.nodes();
        let node = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let id = *node.children()?.get(name).ok_or(FsError::NotFound)?;
        self.fs.dirent(&nodes, id, name, Some(dir))
    }

    fn create(&self, dir: &DirentRef, name: &str, flags: FileFlags, attrs: NewNodeAttrs) -> FsResult<FileRef> {
        self.fs.inject(FaultOp::Create)?;
        let dirent = self.create_node(dir, name, NodeKind::Regular, attrs, Contents::Other)?;
        Ok(File::new(dirent, flags))
    }

    fn create_directory(&self, dir: &DirentRef, name: &str, attrs: NewNodeAttrs) -> FsResult<()> {
        self.fs.inject(FaultOp::Mkdir)?;
        self.create_node(
            dir,
            name,
            NodeKind::Directory,
            attrs,
            Contents::Directory(BTreeMap::new()),
        )
        .map(drop)
    }

    fn create_link(&self, dir: &DirentRef, target: &str, name: &str, owner: FileOwner) -> FsResult<()> {
        self.fs.inject(FaultOp::Create)?;
        let mut node = Node::new(
            NodeKind::Symlink,
            FilePerms(0o777),
            owner,
            Contents::Symlink(target.to_string()),
        );
        node.attr.size = target.len() as u64;
        self.fs.insert_child(dir, name, node).map(drop)
    }

    fn create_hard_link(&self, _dir: &DirentRef, target: &DirentRef, name: &str) -> FsResult<()> {
        self.fs.inject(FaultOp::Link)?;
        if target.stable_attr().device != MEMFS_DEVICE {
            return Err(FsError::Host(abi::EXDEV));
        }
        let mut nodes = self.fs.nodes();
        if !nodes.contains_key(&target.id()) {
            return Err(FsError::NotFound);
        }
        let dir = nodes.get_mut(&self.id).ok_or(FsError::NotFound)?;
        let children = dir.children_mut()?;
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        children.insert(name.to_string(), target.id());
        dir.touch_modified();
        if let Some(node) = nodes.get_mut(&target.id()) {
            node.attr.links += 1;
            node.attr.times.ctime = Timespec::now();
        }
        Ok(())
    }

    fn create_fifo(&self, dir: &DirentRef, name: &str, attrs: NewNodeAttrs) -> FsResult<()> {
        self.fs.inject(FaultOp::Create)?;
        self.create_node(dir, name, NodeKind::Fifo, attrs, Contents::Other).map(drop)
    }

    fn remove(&self, _dir: &DirentRef, name: &str) -> FsResult<()> {
        self.fs.inject(FaultOp::Remove)?;
        let mut nodes = self.fs.nodes();
        let dir = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let id = *dir.children()?.get(name).ok_or(FsError::NotFound)?;
        if nodes.get(&id).is_some_and(|node| node.kind.is_dir()) {
            return Err(FsError::IsADirectory);
        }
        if let Some(dir) = nodes.get_mut(&self.id) {
            dir.children_mut()?.remove(name);
            dir.touch_modified();
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.attr.links = node.attr.links.saturating_sub(1);
            node.attr.times.ctime = Timespec::now();
        }
        MemFsInner::reclaim_if_unused(&mut nodes, id);
        Ok(())
    }

    fn remove_directory(&self, _dir: &DirentRef, name: &str) -> FsResult<()> {
        self.fs.inject(FaultOp::Remove)?;
        let mut nodes = self.fs.nodes();
        let dir = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let id = *dir.children()?.get(name).ok_or(FsError::NotFound)?;
        let victim = nodes.get(&id).ok_or(FsError::NotFound)?;
        if !victim.children()?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        if let Some(dir) = nodes.get_mut(&self.id) {
            dir.children_mut()?.remove(name);
            dir.attr.links = dir.attr.links.saturating_sub(1);
            dir.touch_modified();
        }
        if let Some(node) = nodes.get_mut(&id) {
            node.attr.links = 0;
            node.dotdot = None;
        }
        MemFsInner::reclaim_if_unused(&mut nodes, id);
        Ok(())
    }

    fn rename(
        &self,
        _old_parent: &DirentRef,
        old_name: &str,
        new_parent: &DirentRef,
        new_name: &str,
        replacement: bool,
    ) -> FsResult<()> {
        self.fs.inject(FaultOp::Rename)?;
        let new_dir = new_parent.id();
        let mut nodes = self.fs.nodes();

        let moved = *nodes
            .get(&self.id)
            .ok_or(FsError::NotFound)?
            .children()?
            .get(old_name)
            .ok_or(FsError::NotFound)?;
        let moved_is_dir = nodes.get(&moved).is_some_and(|node| node.kind.is_dir());
        let replaced = nodes
            .get(&new_dir)
            .ok_or(FsError::NotFound)?
            .children()?
            .get(new_name)
            .copied();
        if replaced.is_some() != replacement {
            tracing::warn!(new_name, replacement, "rename target changed since it was checked");
        }
        if replaced == Some(moved) {
            return Ok(());
        }
        if let Some(replaced) = replaced {
            let node = nodes.get(&replaced).ok_or(FsError::NotFound)?;
            match (&node.contents, moved_is_dir) {
                (Contents::Directory(children), true) if !children.is_empty() => {
                    return Err(FsError::NotEmpty)
                }
                (Contents::Directory(_), false) => return Err(FsError::IsADirectory),
                (_, true) if !node.kind.is_dir() => return Err(FsError::NotADirectory),
                _ => {}
            }
        }

        if let Some(dir) = nodes.get_mut(&self.id) {
            dir.children_mut()?.remove(old_name);
            if moved_is_dir {
                dir.attr.links = dir.attr.links.saturating_sub(1);
            }
            dir.touch_modified();
        }
        if let Some(dir) = nodes.get_mut(&new_dir) {
            dir.children_mut()?.insert(new_name.to_string(), moved);
            if moved_is_dir {
                dir.attr.links += 1;
            }
            dir.touch_modified();
        }
        if moved_is_dir {
            if let Some(node) = nodes.get_mut(&moved) {
                node.dotdot = Some((new_dir, new_name.to_string()));
                node.attr.times.ctime = Timespec::now();
            }
        }
        if let Some(replaced) = replaced {
            let mut replaced_dir = false;
            if let Some(node) = nodes.get_mut(&replaced) {
                replaced_dir = node.kind.is_dir();
                if replaced_dir {
                    node.attr.links = 0;
                    node.dotdot = None;
                } else {
                    node.attr.links = node.attr.links.saturating_sub(1);
                }
            }
            if replaced_dir {
                if let Some(dir) = nodes.get_mut(&new_dir) {
                    dir.attr.links = dir.attr.links.saturating_sub(1);
                }
            }
            MemFsInner::reclaim_if_unused(&mut nodes, replaced);
        }
        Ok(())
    }

    fn readlink(&self) -> FsResult<String> {
        self.with_node(|node| match &node.contents {
            Contents::Symlink(text) | Contents::DirectLink { text, .. } => Ok(text.clone()),
            _ => Err(FsError::InvalidArgument),
        })
    }

    fn getlink(&self) -> FsResult<SymlinkResolution> {
        let nodes = self.fs.nodes();
        let node = nodes.get(&self.id).ok_or(FsError::NotFound)?;
        let Contents::DirectLink { text, target } = &node.contents else {
            return Ok(SymlinkResolution::ViaReadlink);
        };
        let target = self.fs.dirent(&nodes, *target, text, None)?;
        Ok(SymlinkResolution::Direct(target))
    }

    fn truncate(&self, size: u64) -> FsResult<()> {
        self.fs.inject(FaultOp::Truncate)?;
        self.with_node(|node| {
            if !node.kind.is_regular() {
                return Err(FsError::InvalidArgument);
            }
            node.attr.size = size;
            node.touch_modified();
            Ok(())
        })
    }

    fn allocate(&self, offset: u64, len: u64) -> FsResult<()> {
        self.fs.inject(FaultOp::Allocate)?;
        let end = offset.checked_add(len).ok_or(FsError::FileTooLarge)?;
        self.with_node(|node| {
            if !node.kind.is_regular() {
                return Err(FsError::NoSuchDevice);
            }
            if end > node.attr.size {
                node.attr.size = end;
                node.touch_modified();
            }
            Ok(())
        })
    }

    fn set_owner(&self, owner: FileOwner) -> FsResult<()> {
        self.fs.inject(FaultOp::SetAttr)?;
        self.with_node(|node| {
            if owner.uid.is_valid() {
                node.attr.owner.uid = owner.uid;
            }
            if owner.gid.is_valid() {
                node.attr.owner.gid = owner.gid;
            }
            node.attr.times.ctime = Timespec::now();
            Ok(())
        })
    }

    fn set_permissions(&self, perms: FilePerms) -> FsResult<()> {
        self.fs.inject(FaultOp::SetAttr)?;
        self.with_node(|node| {
            node.attr.perms = perms;
            node.attr.times.ctime = Timespec::now();
            Ok(())
        })
    }

    fn set_timestamps(&self, update: TimestampUpdate) -> FsResult<()> {
        self.fs.inject(FaultOp::SetAttr)?;
        let now = Timespec::now();
        let resolve = |update: TimeUpdate, current: Timespec| match update {
            TimeUpdate::Omit => current,
            TimeUpdate::Now => now,
            TimeUpdate::At(ts) => ts,
        };
        self.with_node(|node| {
            node.attr.times.atime = resolve(update.atime, node.attr.times.atime);
            node.attr.times.mtime = resolve(update.mtime, node.attr.times.mtime);
            node.attr.times.ctime = now;
            Ok(())
        })
    }

    fn lock_context(&self) -> Option<LockContext> {
        self.with_node(|node| Ok(node.locks.clone())).ok().flatten()
    }
}

/// A named reference to a [`MemInode`].
pub struct MemDirent {
    inode: MemInode,
    name: String,
    parent: Option<DirentRef>,
}

impl Dirent for MemDirent {
    fn name(&self) -> String {
        if self.inode.kind.is_dir() {
            let nodes = self.inode.fs.nodes();
            if let Some((_, name)) = nodes.get(&self.inode.id).and_then(|node| node.dotdot.as_ref()) {
                return name.clone();
            }
        }
        self.name.clone()
    }

    fn inode(&self) -> &dyn Inode {
        &self.inode
    }

    fn parent(&self) -> Option<DirentRef> {
        if !self.inode.kind.is_dir() {
            return self.parent.clone();
        }
        let fs = &self.inode.fs;
        let nodes = fs.nodes();
        let (parent, _) = nodes.get(&self.inode.id)?.dotdot.as_ref()?;
        let name = nodes
            .get(parent)
            .and_then(|node| node.dotdot.as_ref())
            .map_or("/", |(_, name)| name.as_str());
        fs.dirent(&nodes, *parent, name, None).ok()
    }

    fn acquire(&self) {
        self.inode.refs.fetch_add(1, Ordering::SeqCst);
        self.inode.fs.ledger.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.inode.fs.ledger.released.fetch_add(1, Ordering::SeqCst);
        if self.inode.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut nodes = self.inode.fs.nodes();
            MemFsInner::reclaim_if_unused(&mut nodes, self.inode.id);
        }
    }
}
