//! Graph nodes and their change-detection contract.
//!
//! The variant set is closed: a node is a filesystem entry, an alias (a named
//! grouping target), or a synthetic dummy.  `unchanged` is the only place
//! filesystem state is consulted during a build.

use crate::db::SignatureStore;
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId, TaskId};
use crate::hash::Signature;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// How a filesystem node decides it changed since its last record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangePolicy {
    /// Changed iff the modification time differs from the recorded one.
    Timestamp,
    /// Unchanged if the modification time matches, or if it moved but the
    /// content signature still equals the recorded one.
    #[default]
    Content,
}

#[derive(Debug)]
pub struct FsEntry {
    /// Path relative to the graph root, or absolute if outside it.
    pub path: String,
    pub abspath: PathBuf,
    /// true: regular file, false: directory, None: not known yet.
    is_file: Option<bool>,
    pub policy: ChangePolicy,
}

impl FsEntry {
    pub(crate) fn new(path: String, abspath: PathBuf, is_file: Option<bool>, policy: ChangePolicy) -> Self {
        FsEntry {
            path,
            abspath,
            is_file,
            policy,
        }
    }

    pub fn is_file(&self) -> Option<bool> {
        self.is_file
    }

    pub fn make_file(&mut self) {
        self.is_file = Some(true);
    }

    pub fn make_directory(&mut self) {
        self.is_file = Some(false);
    }

    /// Directory part of the logical path, "." for top-level entries.
    pub fn dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) => "/",
            Some(i) => &self.path[..i],
            None => ".",
        }
    }

    /// File name, without the directory.
    pub fn file(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) => &self.path[i + 1..],
            None => &self.path,
        }
    }

    /// Extension including the leading dot, or "" if there is none.
    pub fn suffix(&self) -> &str {
        let file = self.file();
        match file.rfind('.') {
            Some(0) | None => "",
            Some(i) => &file[i..],
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    File(FsEntry),
    Alias(String),
    Dummy(String),
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// The task that produces this node, set at most once.
    pub(crate) task: Option<TaskId>,
    /// Out-edges: the nodes this node depends on.
    pub(crate) deps: Vec<NodeId>,
    pub(crate) always_build: bool,
    unchanged: Cell<Option<bool>>,
    /// Content signature computed while checking for changes, reused when
    /// the node's record is written back.
    signature: Cell<Option<Signature>>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            task: None,
            deps: Vec::new(),
            always_build: false,
            unchanged: Cell::new(None),
            signature: Cell::new(None),
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::File(entry) => &entry.path,
            NodeKind::Alias(name) | NodeKind::Dummy(name) => name,
        }
    }

    /// Type tag; together with the name it keys the node's persisted record.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            NodeKind::File(_) => "fs",
            NodeKind::Alias(_) => "alias",
            NodeKind::Dummy(_) => "dummy",
        }
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    pub fn deps(&self) -> &[NodeId] {
        &self.deps
    }

    pub fn always_build(&self) -> bool {
        self.always_build
    }

    pub fn fs_entry(&self) -> Option<&FsEntry> {
        match &self.kind {
            NodeKind::File(entry) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn fs_entry_mut(&mut self) -> Option<&mut FsEntry> {
        match &mut self.kind {
            NodeKind::File(entry) => Some(entry),
            _ => None,
        }
    }

    /// Drop memoized change state, e.g. after the node's task rewrote it.
    pub fn invalidate(&self) {
        self.unchanged.set(None);
        self.signature.set(None);
    }

    pub(crate) fn cached_signature(&self) -> Option<Signature> {
        self.signature.get()
    }
}

/// Whether node `id` is unchanged since its previously recorded state.
///
/// Dummy nodes never change.  Filesystem nodes compare existence and
/// timestamp (and, under `ChangePolicy::Content`, the content signature)
/// against their record; the result is memoized until `Node::invalidate`.
/// An alias is unchanged iff it was recorded before, its dependency set is
/// the recorded one, and each of its dependencies is unchanged.
pub fn unchanged(graph: &Graph, store: &mut SignatureStore, fs: &dyn FileSystem, id: NodeId) -> bool {
    let node = graph.node(id);
    match &node.kind {
        NodeKind::Dummy(_) => true,
        NodeKind::File(entry) => {
            if let Some(memo) = node.unchanged.get() {
                return memo;
            }
            let result = entry_unchanged(node, entry, store, graph, id, fs);
            if !result {
                debug!("{} has changed", entry.path);
            }
            node.unchanged.set(Some(result));
            result
        }
        NodeKind::Alias(_) => {
            if let Some(memo) = node.unchanged.get() {
                return memo;
            }
            let result = alias_unchanged(graph, store, fs, id);
            node.unchanged.set(Some(result));
            result
        }
    }
}

fn entry_unchanged(
    node: &Node,
    entry: &FsEntry,
    store: &mut SignatureStore,
    graph: &Graph,
    id: NodeId,
    fs: &dyn FileSystem,
) -> bool {
    let now = match fs.stat(&entry.abspath) {
        Ok(mtime) => mtime,
        Err(err) => {
            warn!("stat {}: {}", entry.abspath.display(), err);
            return false;
        }
    };
    let record = store.record(graph, id);
    match (now, record.existed) {
        (MTime::Missing, Some(false)) => true,
        (MTime::Stamp(stamp), Some(true)) => {
            if record.timestamp == Some(stamp) {
                return true;
            }
            if entry.policy != ChangePolicy::Content || entry.is_file == Some(false) {
                return false;
            }
            let prev = match record.signature {
                Some(sig) => sig,
                None => return false,
            };
            match fs.signature(&entry.abspath) {
                Ok(sig) => {
                    node.signature.set(Some(sig));
                    sig == prev
                }
                Err(_) => false,
            }
        }
        _ => false,
    }
}

fn alias_unchanged(graph: &Graph, store: &mut SignatureStore, fs: &dyn FileSystem, id: NodeId) -> bool {
    let record = store.record(graph, id);
    if record.existed != Some(true) {
        return false;
    }
    let prev = record.dependencies.clone();
    let deps = graph.node(id).deps();
    let mut current = BTreeSet::new();
    for &dep in deps {
        match store.ensure_id(graph, dep) {
            Some(db_id) => {
                current.insert(db_id);
            }
            None => return false,
        }
    }
    if current != prev {
        return false;
    }
    deps.iter().all(|&dep| unchanged(graph, store, fs, dep))
}
