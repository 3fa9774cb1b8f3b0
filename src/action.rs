//! Concrete actions: shell commands and in-process closures.

use crate::env::Env;
use crate::process::run_command;
use crate::task::Action;

/// A command line, expanded against the task environment and run by the
/// shell.
#[derive(Debug, Clone)]
pub struct CommandAction {
    command: String,
    /// Treat any exit status as success (make's `-` recipe prefix).
    pub ignore_errors: bool,
}

impl CommandAction {
    pub fn new(command: impl Into<String>) -> Self {
        CommandAction {
            command: command.into(),
            ignore_errors: false,
        }
    }
}

impl Action for CommandAction {
    fn describe(&self, env: &Env) -> String {
        env.subst(&self.command)
    }

    fn run(&self, env: &Env, output: &mut Vec<u8>) -> anyhow::Result<i32> {
        let cmdline = self.describe(env);
        let status = run_command(&cmdline, output)?;
        if status != 0 && self.ignore_errors {
            output.extend_from_slice(format!("(ignored exit status {})\n", status).as_bytes());
            return Ok(0);
        }
        Ok(status)
    }
}

type ActionFn = dyn Fn(&Env, &mut Vec<u8>) -> anyhow::Result<i32> + Send + Sync;

/// Runs a closure in-process.  The description is expanded like a command
/// line so it participates in the task signature.
pub struct FnAction {
    description: String,
    func: Box<ActionFn>,
}

impl FnAction {
    pub fn new<F>(description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Env, &mut Vec<u8>) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        FnAction {
            description: description.into(),
            func: Box::new(func),
        }
    }
}

impl Action for FnAction {
    fn describe(&self, env: &Env) -> String {
        env.subst(&self.description)
    }

    fn run(&self, env: &Env, output: &mut Vec<u8>) -> anyhow::Result<i32> {
        (self.func)(env, output)
    }
}
