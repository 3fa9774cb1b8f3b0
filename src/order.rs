//! The build-order walk: a depth-first traversal from the goal that runs
//! implicit-dependency scanners as it discovers nodes and rejects cycles.

use crate::db::SignatureStore;
use crate::error::BuildError;
use crate::fs::FileSystem;
use crate::graph::{Graph, NodeId, TaskId};
use crate::runner::panic_message;
use crate::scan::ScanContext;
use anyhow::anyhow;
use rustc_hash::{FxHashMap, FxHashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// A task reachable from the goal, with all of its targets that the walk
/// visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTargets {
    pub task: TaskId,
    pub targets: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct BuildOrder {
    /// Every reachable node, each after all of its dependencies.
    pub nodes: Vec<NodeId>,
    /// One entry per reachable task, in the order their first target finished.
    pub tasks: Vec<TaskTargets>,
    /// Tasks whose scanner failed; they must not be run.
    pub scan_failures: FxHashSet<TaskId>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the walk stack.
    InProgress,
    Done,
}

/// Compute the build order for `goal`.  Scanners may add nodes and edges to
/// the graph while this runs; edges added to a node before the walk moves
/// past it are traversed too.
pub fn build_order(
    graph: &mut Graph,
    store: &mut SignatureStore,
    fs: &dyn FileSystem,
    goal: NodeId,
) -> anyhow::Result<BuildOrder> {
    let mut order = BuildOrder::default();
    let mut marks: FxHashMap<NodeId, Mark> = FxHashMap::default();
    let mut task_index: FxHashMap<TaskId, usize> = FxHashMap::default();
    // (node, index of the next out-edge to follow)
    let mut stack: Vec<(NodeId, usize)> = Vec::new();

    discover(graph, store, fs, goal, &mut order);
    marks.insert(goal, Mark::InProgress);
    stack.push((goal, 0));

    while let Some(top) = stack.last_mut() {
        let (id, next) = *top;
        // Re-read every step: a scanner may have grown the edge list.
        if let Some(&dep) = graph.node(id).deps().get(next) {
            top.1 += 1;
            match marks.get(&dep).copied() {
                None => {
                    discover(graph, store, fs, dep, &mut order);
                    marks.insert(dep, Mark::InProgress);
                    stack.push((dep, 0));
                }
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|&(n, _)| graph.node(n).name().to_owned())
                        .collect();
                    cycle.push(graph.node(dep).name().to_owned());
                    return Err(BuildError::NotADag { cycle }.into());
                }
                Some(Mark::Done) => {}
            }
            continue;
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        order.nodes.push(id);
        if let Some(task) = graph.node(id).task() {
            let index = *task_index.entry(task).or_insert_with(|| {
                order.tasks.push(TaskTargets {
                    task,
                    targets: Vec::new(),
                });
                order.tasks.len() - 1
            });
            order.tasks[index].targets.push(id);
        }
    }

    debug!(
        "build order: {} nodes, {} tasks",
        order.nodes.len(),
        order.tasks.len()
    );
    Ok(order)
}

/// Run the owning task's scanner, if any, over the node's current out-edges.
fn discover(
    graph: &mut Graph,
    store: &mut SignatureStore,
    fs: &dyn FileSystem,
    id: NodeId,
    order: &mut BuildOrder,
) {
    let task = match graph.node(id).task() {
        Some(task) => task,
        None => return,
    };
    let scanner = match graph.task(task).scanner() {
        Some(scanner) => scanner.clone(),
        None => return,
    };
    let env = graph.task_env(task);
    let sources = graph.node(id).deps().to_vec();
    let mut cx = ScanContext {
        graph,
        store,
        fs,
        env: &env,
    };
    for source in sources {
        let result = catch_unwind(AssertUnwindSafe(|| scanner.scan(&mut cx, id, source)))
            .unwrap_or_else(|payload| {
                Err(anyhow!("panicked: {}", panic_message(payload.as_ref())))
            });
        if let Err(err) = result {
            error!(
                "scanning {} for {}: {:#}",
                cx.graph.node(source).name(),
                cx.graph.node(id).name(),
                err
            );
            order.scan_failures.insert(task);
            return;
        }
    }
}
