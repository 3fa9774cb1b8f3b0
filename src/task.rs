//! Tasks: the unit of work binding target nodes to the actions that produce
//! them.

use crate::env::Env;
use crate::graph::NodeId;
use crate::hash::{sign_commands, Signature};
use crate::scan::Scanner;
use std::sync::Arc;

/// One executable step of a task.
pub trait Action: Send + Sync {
    /// Human-readable command line, used for display and for the task
    /// signature.
    fn describe(&self, env: &Env) -> String;

    /// Execute, appending any console output to `output`.  Returns a
    /// process-style exit status, 0 meaning success.  An `Err` is a failure
    /// outside the action itself (e.g. the process couldn't be spawned).
    fn run(&self, env: &Env, output: &mut Vec<u8>) -> anyhow::Result<i32>;
}

pub struct Task {
    targets: Vec<NodeId>,
    sources: Vec<NodeId>,
    actions: Arc<[Arc<dyn Action>]>,
    env: Arc<Env>,
    scanner: Option<Arc<dyn Scanner>>,
}

impl Task {
    pub fn new(
        env: Env,
        targets: Vec<NodeId>,
        sources: Vec<NodeId>,
        actions: Vec<Arc<dyn Action>>,
    ) -> Self {
        Task {
            targets,
            sources,
            actions: actions.into(),
            env: Arc::new(env),
            scanner: None,
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub(crate) fn push_source(&mut self, source: NodeId) {
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }

    pub fn actions(&self) -> &Arc<[Arc<dyn Action>]> {
        &self.actions
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn scanner(&self) -> Option<&Arc<dyn Scanner>> {
        self.scanner.as_ref()
    }
}

/// The command lines a task would run, in order.
pub fn describe_all(actions: &[Arc<dyn Action>], env: &Env) -> Vec<String> {
    actions.iter().map(|a| a.describe(env)).collect()
}

/// Signature of the work a task would do; None for an action-less task.
pub fn task_signature(commands: &[String]) -> Option<Signature> {
    sign_commands(commands.iter().map(String::as_str))
}

/// Run a task's actions in order against `env`, stopping at the first
/// failure.  Returns the exit status of the task as a whole.
pub fn execute(actions: &[Arc<dyn Action>], env: &Env, output: &mut Vec<u8>) -> i32 {
    for action in actions {
        let status = match action.run(env, output) {
            Ok(status) => status,
            Err(err) => {
                output.extend_from_slice(format!("{:#}\n", err).as_bytes());
                1
            }
        };
        if status != 0 {
            return status;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;

    #[test]
    fn stops_at_first_failure() {
        let ran = Arc::new(std::sync::Mutex::new(Vec::new()));
        let step = |name: &'static str, status: i32| -> Arc<dyn Action> {
            let ran = ran.clone();
            Arc::new(FnAction::new(name, move |_env, _out| {
                ran.lock().unwrap().push(name);
                Ok(status)
            }))
        };
        let actions = vec![step("one", 0), step("two", 3), step("three", 0)];
        let mut output = Vec::new();
        assert_eq!(execute(&actions, &Env::new(), &mut output), 3);
        assert_eq!(*ran.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn error_becomes_status() {
        let actions: Vec<Arc<dyn Action>> = vec![Arc::new(FnAction::new("boom", |_env, _out| {
            anyhow::bail!("no such tool")
        }))];
        let mut output = Vec::new();
        assert_eq!(execute(&actions, &Env::new(), &mut output), 1);
        assert_eq!(String::from_utf8_lossy(&output), "no such tool\n");
    }

    #[test]
    fn signature_follows_commands() {
        let mut env = Env::new();
        env.set("CC", "cc");
        let actions: Vec<Arc<dyn Action>> =
            vec![Arc::new(FnAction::new("$(CC) -c", |_env, _out| Ok(0)))];
        let a = task_signature(&describe_all(&actions, &env));
        env.set("CC", "clang");
        let b = task_signature(&describe_all(&actions, &env));
        assert!(a.is_some());
        assert_ne!(a, b);
        assert_eq!(task_signature(&[]), None);
    }
}
