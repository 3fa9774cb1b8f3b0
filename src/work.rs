//! Build runner, choosing and executing tasks as determined by out of date
//! inputs.

use crate::db::SignatureStore;
use crate::env::Env;
use crate::error::BuildError;
use crate::fs::FileSystem;
use crate::graph::{Graph, NodeId, TaskId};
use crate::hash::Signature;
use crate::node;
use crate::order::{build_order, BuildOrder};
use crate::progress::{Progress, TaskCounts};
use crate::runner::{FinishedTask, Runner};
use crate::task::{describe_all, task_signature};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

/// Build steps go through this sequence of states, re-evaluated each round
/// against the build order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Some dependency is still in progress.
    Blocked,
    /// Out of date, waiting for a free slot.
    ToBuild,
    /// The owning task is running.
    Scheduled,
    /// Up to date or successfully rebuilt.
    Built,
    /// The owning task failed, or a dependency did.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TaskState {
    /// Out of date, not started yet.
    Ready,
    Scheduled,
    UpToDate,
    Done,
    /// Ran and exited non-zero.
    Failed,
    /// Never ran because its scanner failed.
    ScanFailed,
    /// Never ran because a dependency failed.
    Poisoned,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DepsState {
    Ready,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Maximum concurrently running tasks; None for no limit.
    pub parallelism: Option<NonZeroUsize>,
    /// Treat every task as out of date.
    pub always_build: bool,
    /// Keep building independent work after a failure.
    pub keep_going: bool,
}

/// Turn a requested job count into a parallelism limit: absent means
/// unbounded, 0 means one per available CPU.
pub fn resolve_parallelism(jobs: Option<usize>) -> Option<NonZeroUsize> {
    match jobs {
        None => None,
        Some(0) => Some(std::thread::available_parallelism().unwrap_or_else(|err| {
            warn!("can't detect available parallelism ({}); using 1", err);
            NonZeroUsize::MIN
        })),
        Some(n) => NonZeroUsize::new(n),
    }
}

pub struct Work<'a> {
    graph: &'a mut Graph,
    store: &'a mut SignatureStore,
    fs: &'a dyn FileSystem,
    progress: &'a mut dyn Progress,
    options: Options,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: &'a mut Graph,
        store: &'a mut SignatureStore,
        fs: &'a dyn FileSystem,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        Work {
            graph,
            store,
            fs,
            progress,
            options,
        }
    }

    /// Bring `goal` up to date.  Returns the number of tasks that ran.
    pub fn run(self, goal: NodeId) -> anyhow::Result<usize> {
        let Work {
            graph,
            store,
            fs,
            progress,
            options,
        } = self;
        let order = build_order(graph, store, fs, goal)?;
        let mut scheduler = Scheduler::new(graph, store, fs, progress, options, order);
        let result = scheduler.run(goal);
        scheduler.abandon_unfinished();
        result
    }
}

struct Scheduler<'a> {
    graph: &'a Graph,
    store: &'a mut SignatureStore,
    fs: &'a dyn FileSystem,
    progress: &'a mut dyn Progress,
    options: Options,
    order: BuildOrder,
    /// Index into order.tasks for each task.
    task_index: FxHashMap<TaskId, usize>,
    nodes: FxHashMap<NodeId, NodeState>,
    tasks: FxHashMap<TaskId, TaskState>,
    runner: Runner,
    counts: TaskCounts,
    ran: usize,
    failures: usize,
}

impl<'a> Scheduler<'a> {
    fn new(
        graph: &'a Graph,
        store: &'a mut SignatureStore,
        fs: &'a dyn FileSystem,
        progress: &'a mut dyn Progress,
        options: Options,
        order: BuildOrder,
    ) -> Self {
        let task_index = order
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task, i))
            .collect();
        let runner = Runner::new(options.parallelism);
        let counts = TaskCounts {
            total: order.tasks.len(),
            ..Default::default()
        };
        Scheduler {
            graph,
            store,
            fs,
            progress,
            options,
            order,
            task_index,
            nodes: FxHashMap::default(),
            tasks: FxHashMap::default(),
            runner,
            counts,
            ran: 0,
            failures: 0,
        }
    }

    fn stopping(&self) -> bool {
        self.failures > 0 && !self.options.keep_going
    }

    fn run(&mut self, goal: NodeId) -> anyhow::Result<usize> {
        self.progress.update(&self.counts);
        loop {
            for finished in self.runner.drain() {
                self.finish(finished);
            }
            if self.stopping() {
                break;
            }
            let changed = self.advance();
            if matches!(
                self.nodes.get(&goal),
                Some(NodeState::Built | NodeState::Failed)
            ) {
                break;
            }
            if self.runner.is_running() {
                if let Some(finished) = self.runner.wait() {
                    self.finish(finished);
                }
                continue;
            }
            if !changed {
                return Err(BuildError::Stalled.into());
            }
        }

        // Fail-fast stops scheduling, but in-flight tasks run to completion.
        for finished in self.runner.wait_all() {
            self.finish(finished);
        }
        if self.failures > 0 {
            return Err(BuildError::TasksFailed {
                failed: self.failures,
                ran: self.ran,
            }
            .into());
        }
        info!(
            "{} tasks ran, {} up to date",
            self.ran, self.counts.up_to_date
        );
        Ok(self.ran)
    }

    /// One pass over the build order, moving every node whose state can
    /// move.  Returns whether anything changed.
    fn advance(&mut self) -> bool {
        let mut changed = false;
        for i in 0..self.order.nodes.len() {
            let id = self.order.nodes[i];
            let old = self.nodes.get(&id).copied();
            if matches!(
                old,
                Some(NodeState::Built | NodeState::Failed | NodeState::Scheduled)
            ) {
                continue;
            }
            let new = self.evaluate(id);
            if old != Some(new) {
                self.nodes.insert(id, new);
                changed = true;
            }
        }
        changed
    }

    /// The state of `id`'s dependencies.  Dependencies produced by `task`
    /// itself are skipped: a target may depend on a sibling target, and both
    /// are satisfied by the same run.
    fn deps_state(&self, id: NodeId, task: Option<TaskId>) -> DepsState {
        let mut failed = false;
        for dep in self.graph.node(id).deps() {
            if task.is_some() && self.graph.node(*dep).task() == task {
                continue;
            }
            match self.nodes.get(dep) {
                Some(NodeState::Built) => {}
                Some(NodeState::Failed) => failed = true,
                _ => return DepsState::Blocked,
            }
        }
        if failed {
            DepsState::Failed
        } else {
            DepsState::Ready
        }
    }

    fn evaluate(&mut self, id: NodeId) -> NodeState {
        let owner = self.graph.node(id).task();
        match self.deps_state(id, owner) {
            DepsState::Blocked => return NodeState::Blocked,
            DepsState::Failed => {
                if let Some(task) = owner {
                    self.poison(task);
                }
                return NodeState::Failed;
            }
            DepsState::Ready => {}
        }
        let task = match owner {
            None => return NodeState::Built,
            Some(task) => task,
        };
        match self.tasks.get(&task) {
            Some(TaskState::UpToDate | TaskState::Done) => return NodeState::Built,
            Some(TaskState::Failed | TaskState::ScanFailed | TaskState::Poisoned) => {
                return NodeState::Failed
            }
            Some(TaskState::Scheduled) => return NodeState::Scheduled,
            Some(TaskState::Ready) => return self.try_start(task),
            None => {}
        }

        // A task is ready only once every visited target's deps are.
        for &target in self.targets(task).to_vec().iter().filter(|&&t| t != id) {
            match self.deps_state(target, Some(task)) {
                DepsState::Blocked => return NodeState::Blocked,
                DepsState::Failed => {
                    self.poison(task);
                    return NodeState::Failed;
                }
                DepsState::Ready => {}
            }
        }

        if self.order.scan_failures.contains(&task) {
            self.tasks.insert(task, TaskState::ScanFailed);
            self.failures += 1;
            self.counts.failed += 1;
            self.progress.update(&self.counts);
            let message = format!("failed: scanning dependencies of {}", self.message(task));
            self.progress.log(&message);
            return NodeState::Failed;
        }

        if self.is_up_to_date(task) {
            debug!("{} is up to date", self.message(task));
            self.tasks.insert(task, TaskState::UpToDate);
            self.counts.up_to_date += 1;
            self.progress.update(&self.counts);
            return NodeState::Built;
        }
        self.tasks.insert(task, TaskState::Ready);
        self.try_start(task)
    }

    fn targets(&self, task: TaskId) -> &[NodeId] {
        match self.task_index.get(&task) {
            Some(&i) => &self.order.tasks[i].targets,
            None => &[],
        }
    }

    fn message(&self, task: TaskId) -> String {
        let names: Vec<&str> = self
            .graph
            .task(task)
            .targets()
            .iter()
            .map(|&t| self.graph.node(t).name())
            .collect();
        names.join(" ")
    }

    fn poison(&mut self, task: TaskId) {
        self.tasks.entry(task).or_insert(TaskState::Poisoned);
    }

    /// Decide whether every target of `task` is up to date, updating each
    /// target's recorded task signature.  When out of date, the targets'
    /// task status is cleared so an interrupted run rebuilds them.
    fn is_up_to_date(&mut self, task: TaskId) -> bool {
        let env = self.graph.task_env(task);
        let commands = describe_all(self.graph.task(task).actions(), &env);
        let signature = task_signature(&commands);

        let mut up_to_date = !self.options.always_build;
        if !up_to_date {
            debug!("{}: always building", self.message(task));
        }
        let graph = self.graph;
        let targets = graph.task(task).targets();
        for &target in targets {
            // No short-circuit: every target's record must be brought
            // current, and every dependency's record touched.
            if !self.target_up_to_date(target, signature) {
                up_to_date = false;
            }
        }
        if !up_to_date {
            for &target in targets {
                self.store.record(graph, target).task_status = None;
            }
        }
        up_to_date
    }

    fn target_up_to_date(&mut self, id: NodeId, signature: Option<Signature>) -> bool {
        let graph = self.graph;
        let node = graph.node(id);
        let mut up_to_date = true;

        if node.always_build() {
            debug!("{}: always building", node.name());
            up_to_date = false;
        }
        if node.fs_entry().is_some() && !node::unchanged(graph, self.store, self.fs, id) {
            debug!("{}: missing or modified", node.name());
            up_to_date = false;
        }
        let status = self.store.record(graph, id).task_status;
        if status != Some(0) {
            debug!("{}: last task status {:?}", node.name(), status);
            up_to_date = false;
        }

        let mut current = BTreeSet::new();
        let mut ids_known = true;
        for &dep in node.deps() {
            if !node::unchanged(graph, self.store, self.fs, dep) {
                debug!("{}: dependency {} changed", node.name(), graph.node(dep).name());
                up_to_date = false;
            }
            match self.store.ensure_id(graph, dep) {
                Some(db_id) => {
                    current.insert(db_id);
                }
                None => ids_known = false,
            }
        }
        let record = self.store.record(graph, id);
        if !ids_known || current != record.dependencies {
            if up_to_date {
                debug!("{}: dependency set changed", node.name());
            }
            up_to_date = false;
        }
        if record.task_signature != signature {
            if up_to_date {
                debug!("{}: task signature changed", node.name());
            }
            record.task_signature = signature;
            up_to_date = false;
        }
        up_to_date
    }

    fn try_start(&mut self, task: TaskId) -> NodeState {
        if self.stopping() || !self.runner.can_start_more() {
            return NodeState::ToBuild;
        }
        let env: Env = self.graph.task_env(task);
        let actions = self.graph.task(task).actions().clone();
        let commands = describe_all(&actions, &env);
        let message = self.message(task);

        self.tasks.insert(task, TaskState::Scheduled);
        self.counts.running += 1;
        self.progress.update(&self.counts);
        self.progress.task_started(task, &message, &commands);
        self.runner.start(task, actions, env);
        NodeState::Scheduled
    }

    /// Record a finished task's outcome before anything depending on it is
    /// looked at again.
    fn finish(&mut self, finished: FinishedTask) {
        let FinishedTask { task, result, .. } = finished;
        let success = result.success();
        for &target in self.graph.task(task).targets() {
            self.store.record(self.graph, target).task_status = Some(result.status);
            self.graph.node(target).invalidate();
        }
        let node_state = if success {
            NodeState::Built
        } else {
            NodeState::Failed
        };
        for &target in self.targets(task).to_vec().iter() {
            self.nodes.insert(target, node_state);
        }

        self.ran += 1;
        self.counts.running -= 1;
        if success {
            self.tasks.insert(task, TaskState::Done);
            self.counts.done += 1;
        } else {
            self.tasks.insert(task, TaskState::Failed);
            self.counts.failed += 1;
            self.failures += 1;
        }
        let message = self.message(task);
        self.progress.update(&self.counts);
        self.progress.task_finished(task, &message, &result);
    }

    /// Clear the recorded status of every target whose task neither ran nor
    /// was found up to date, so the next run can't mistake it for current.
    fn abandon_unfinished(&mut self) {
        for entry in &self.order.tasks {
            match self.tasks.get(&entry.task) {
                Some(TaskState::UpToDate | TaskState::Done | TaskState::Failed) => {}
                _ => {
                    for &target in &entry.targets {
                        self.store.record(self.graph, target).task_status = None;
                    }
                }
            }
        }
    }
}
