//! The build graph: nodes, the "depends on" edges between them, and the tasks
//! that produce them.

use crate::canon::{canon_path, relative_to};
use crate::densemap::{dense_id, DenseMap};
use crate::env::Env;
use crate::error::BuildError;
use crate::node::{ChangePolicy, FsEntry, Node, NodeKind};
use crate::task::Task;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

dense_id!(
    /// Id for Node entries in the graph.  Assigned on creation, never reused.
    NodeId
);
dense_id!(
    /// Id for Task entries in the graph.
    TaskId
);

pub struct Graph {
    /// Canonical absolute directory that relative names resolve against.
    root: String,
    nodes: DenseMap<NodeId, Node>,
    tasks: DenseMap<TaskId, Task>,
    files: FxHashMap<String, NodeId>,
    aliases: FxHashMap<String, NodeId>,
    edges: usize,
    /// Change policy given to filesystem entries as they are created.
    default_policy: ChangePolicy,
}

impl Graph {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = canon_path(&root.as_ref().to_string_lossy());
        Graph {
            root,
            nodes: DenseMap::default(),
            tasks: DenseMap::default(),
            files: FxHashMap::default(),
            aliases: FxHashMap::default(),
            edges: 0,
            default_policy: ChangePolicy::default(),
        }
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    /// Logical key and absolute path for a filesystem name.  Names inside the
    /// root are keyed relative to it, everything else by absolute path.
    fn entry_path(&self, name: &str) -> (String, PathBuf) {
        let abs = if name.starts_with('/') {
            canon_path(name)
        } else {
            canon_path(&format!("{}/{}", self.root, name))
        };
        let key = match relative_to(&abs, &self.root) {
            Some(rel) => rel.to_owned(),
            None => abs.clone(),
        };
        (key, PathBuf::from(abs))
    }

    /// Look up or create the filesystem node for `name`.  A node created with
    /// an unknown file/directory flag learns it from a later, more specific
    /// request.
    pub fn add_entry(&mut self, name: &str, is_file: Option<bool>) -> NodeId {
        let (key, abspath) = self.entry_path(name);
        if let Some(&id) = self.files.get(&key) {
            if let Some(entry) = self.nodes[id].fs_entry_mut() {
                match is_file {
                    Some(true) if entry.is_file().is_none() => entry.make_file(),
                    Some(false) if entry.is_file().is_none() => entry.make_directory(),
                    _ => {}
                }
            }
            return id;
        }
        let entry = FsEntry::new(key.clone(), abspath, is_file, self.default_policy);
        let id = self.nodes.push(Node::new(NodeKind::File(entry)));
        self.files.insert(key, id);
        id
    }

    pub fn add_file(&mut self, name: &str) -> NodeId {
        self.add_entry(name, Some(true))
    }

    pub fn add_directory(&mut self, name: &str) -> NodeId {
        self.add_entry(name, Some(false))
    }

    pub fn get_entry(&self, name: &str) -> Option<NodeId> {
        let (key, _) = self.entry_path(name);
        self.files.get(&key).copied()
    }

    pub fn add_alias(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.aliases.get(name) {
            return id;
        }
        let id = self.nodes.push(Node::new(NodeKind::Alias(name.to_owned())));
        self.aliases.insert(name.to_owned(), id);
        id
    }

    pub fn get_alias(&self, name: &str) -> Option<NodeId> {
        self.aliases.get(name).copied()
    }

    /// Synthetic nodes live in no namespace; every call makes a new one.
    pub fn add_dummy(&mut self, name: &str) -> NodeId {
        self.nodes.push(Node::new(NodeKind::Dummy(name.to_owned())))
    }

    /// Resolve a user-supplied target name: aliases first, then files.
    pub fn resolve(&self, name: &str) -> Option<NodeId> {
        self.get_alias(name).or_else(|| self.get_entry(name))
    }

    /// Record that `from` depends on `to`.  Returns false, changing nothing,
    /// if the edge was already present.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let deps = &mut self.nodes[from].deps;
        if deps.contains(&to) {
            return false;
        }
        deps.push(to);
        self.edges += 1;
        true
    }

    pub fn set_always_build(&mut self, id: NodeId) {
        self.nodes[id].always_build = true;
    }

    /// The change policy for filesystem entries created from now on.
    pub fn set_default_policy(&mut self, policy: ChangePolicy) {
        self.default_policy = policy;
    }

    /// Override the change policy of one filesystem entry.  Returns false
    /// if `id` isn't one.
    pub fn set_change_policy(&mut self, id: NodeId, policy: ChangePolicy) -> bool {
        match self.nodes[id].fs_entry_mut() {
            Some(entry) => {
                entry.policy = policy;
                true
            }
            None => false,
        }
    }

    /// Commit a task: claim ownership of its targets and add target -> source
    /// edges.  Fails if any target already has an owning task.
    pub fn add_task(&mut self, task: Task) -> anyhow::Result<TaskId> {
        for &target in task.targets() {
            if self.nodes[target].task.is_some() {
                return Err(BuildError::DuplicateOwner {
                    node: self.nodes[target].name().to_owned(),
                }
                .into());
            }
        }
        let id = self.tasks.next_id();
        let targets = task.targets().to_vec();
        let sources = task.sources().to_vec();
        for &target in &targets {
            self.nodes[target].task = Some(id);
            for &source in &sources {
                self.add_edge(target, source);
            }
        }
        self.tasks.push(task);
        Ok(id)
    }

    /// Merge extra sources into an existing task, e.g. from a second rule
    /// naming the same target.
    pub fn add_sources(&mut self, id: TaskId, sources: &[NodeId]) {
        let targets = self.tasks[id].targets().to_vec();
        for &source in sources {
            self.tasks[id].push_source(source);
            for &target in &targets {
                self.add_edge(target, source);
            }
        }
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id]
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// A private copy of the task's environment, seeded with its target and
    /// source names.
    pub fn task_env(&self, id: TaskId) -> Env {
        let task = &self.tasks[id];
        let mut env = task.env().clone();
        let names = |ids: &[NodeId]| -> Vec<String> {
            ids.iter().map(|&id| self.nodes[id].name().to_owned()).collect()
        };
        let targets = names(task.targets());
        let sources = names(task.sources());
        env.set("TARGET", targets.first().cloned().unwrap_or_default());
        env.set("SOURCE", sources.first().cloned().unwrap_or_default());
        env.set("TARGETS", targets);
        env.set("SOURCES", sources);
        env
    }
}
