//! Runs tasks on worker threads, at most `parallelism` at a time.
//! Unaware of the build graph; just action execution and result collection.

use crate::env::Env;
use crate::graph::TaskId;
use crate::task::{execute, Action};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::trace;

pub struct FinishedTask {
    /// A (faked) "thread id": the worker slot the task ran in.
    pub tid: usize,
    pub task: TaskId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// The result of executing a task.
#[derive(Debug)]
pub struct TaskResult {
    /// Exit status of the first failing action, or 0.
    pub status: i32,
    /// Console output.
    pub output: Vec<u8>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Tracks faked "thread ids" -- integers assigned to running tasks so each
/// worker has a stable slot while it runs.
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn new() -> Self {
        ThreadIds { slots: Vec::new() }
    }

    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

/// Finished tasks, posted by workers and collected by the coordinator.
#[derive(Default)]
struct Finished {
    queue: Mutex<VecDeque<FinishedTask>>,
    cond: Condvar,
}

impl Finished {
    fn lock(&self) -> MutexGuard<'_, VecDeque<FinishedTask>> {
        // Workers never panic while holding the lock, so a poisoned queue is
        // still consistent.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn post(&self, task: FinishedTask) {
        self.lock().push_back(task);
        self.cond.notify_all();
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Runner {
    finished: Arc<Finished>,
    threads: FxHashMap<usize, JoinHandle<()>>,
    tids: ThreadIds,
    running: usize,
    /// None: unbounded.
    parallelism: Option<NonZeroUsize>,
}

impl Runner {
    pub fn new(parallelism: Option<NonZeroUsize>) -> Self {
        Runner {
            finished: Arc::new(Finished::default()),
            threads: FxHashMap::default(),
            tids: ThreadIds::new(),
            running: 0,
            parallelism,
        }
    }

    pub fn can_start_more(&self) -> bool {
        match self.parallelism {
            Some(limit) => self.running < limit.get(),
            None => true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Run `actions` in order on a worker thread against `env`.
    pub fn start(&mut self, task: TaskId, actions: Arc<[Arc<dyn Action>]>, env: Env) {
        let tid = self.tids.claim();
        let finished = self.finished.clone();
        let work = move || {
            let start = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut output = Vec::new();
                let status = execute(&actions, &env, &mut output);
                TaskResult { status, output }
            }))
            .unwrap_or_else(|payload| TaskResult {
                status: 1,
                output: format!("panicked: {}\n", panic_message(payload.as_ref())).into_bytes(),
            });
            finished.post(FinishedTask {
                tid,
                task,
                span: (start, Instant::now()),
                result,
            });
        };
        let spawned = std::thread::Builder::new()
            .name(format!("mason-task-{}", tid))
            .spawn(work);
        match spawned {
            Ok(handle) => {
                self.threads.insert(tid, handle);
            }
            Err(err) => {
                let now = Instant::now();
                self.finished.post(FinishedTask {
                    tid,
                    task,
                    span: (now, now),
                    result: TaskResult {
                        status: 1,
                        output: format!("spawning worker: {}\n", err).into_bytes(),
                    },
                });
            }
        }
        self.running += 1;
        trace!("started {:?} in slot {}", task, tid);
    }

    fn retire(&mut self, task: &FinishedTask) {
        self.tids.release(task.tid);
        self.running -= 1;
        if let Some(handle) = self.threads.remove(&task.tid) {
            // The worker posted its result as its last act.
            let _ = handle.join();
        }
    }

    /// Block until a task finishes.  Returns None if nothing is running.
    pub fn wait(&mut self) -> Option<FinishedTask> {
        if self.running == 0 {
            return None;
        }
        let task = {
            let mut queue = self.finished.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                queue = self
                    .finished
                    .cond
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        self.retire(&task);
        Some(task)
    }

    /// Collect whatever has finished, without blocking.
    pub fn drain(&mut self) -> Vec<FinishedTask> {
        let tasks: Vec<FinishedTask> = self.finished.lock().drain(..).collect();
        for task in &tasks {
            self.retire(task);
        }
        tasks
    }

    /// Block until every running task has finished.
    pub fn wait_all(&mut self) -> Vec<FinishedTask> {
        let mut tasks = Vec::new();
        while let Some(task) = self.wait() {
            tasks.push(task);
        }
        tasks
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        for (_, handle) in self.threads.drain() {
            let _ = handle.join();
        }
    }
}
