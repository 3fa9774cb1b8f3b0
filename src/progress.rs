//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::graph::TaskId;
use crate::runner::TaskResult;
use std::io::Write;

/// Counts of reachable tasks by what has happened to them so far.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskCounts {
    /// Tasks reachable from the goal.
    pub total: usize,
    pub up_to_date: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl TaskCounts {
    /// Tasks that have been started, whether or not they have finished.
    pub fn started(&self) -> usize {
        self.running + self.done + self.failed
    }
}

/// Trait for build progress notifications.
pub trait Progress {
    /// Called whenever the counts change.
    fn update(&mut self, counts: &TaskCounts);

    /// Called when a task starts.  `commands` are its expanded command lines.
    fn task_started(&mut self, id: TaskId, message: &str, commands: &[String]);

    /// Called when a task completes.
    fn task_finished(&mut self, id: TaskId, message: &str, result: &TaskResult);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for a plain console, without any overprinting.
pub struct ConsoleProgress<W: Write = std::io::Stdout> {
    /// Whether to print command lines of started tasks.
    verbose: bool,
    counts: TaskCounts,
    out: W,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self::with_writer(verbose, std::io::stdout())
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn with_writer(verbose: bool, out: W) -> Self {
        ConsoleProgress {
            verbose,
            counts: TaskCounts::default(),
            out,
        }
    }

    pub fn into_writer(self) -> W {
        self.out
    }

    fn write(&mut self, bytes: &[u8]) {
        // Console output is best-effort; a closed stdout mustn't fail the build.
        let _ = self.out.write_all(bytes);
        let _ = self.out.flush();
    }
}

impl<W: Write> Progress for ConsoleProgress<W> {
    fn update(&mut self, counts: &TaskCounts) {
        self.counts = counts.clone();
    }

    fn task_started(&mut self, _id: TaskId, message: &str, commands: &[String]) {
        let line = format!(
            "[{}/{}] {}",
            self.counts.started(),
            self.counts.total,
            message
        );
        self.log(&line);
        if self.verbose {
            for command in commands {
                self.log(command);
            }
        }
    }

    fn task_finished(&mut self, _id: TaskId, message: &str, result: &TaskResult) {
        if !result.output.is_empty() {
            self.write(&result.output);
        }
        if !result.success() {
            self.log(&format!("failed: {} (exit status {})", message, result.status));
        }
    }

    fn log(&mut self, msg: &str) {
        self.write(format!("{}\n", msg).as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_lines() {
        let mut progress = ConsoleProgress::with_writer(true, Vec::new());
        progress.update(&TaskCounts {
            total: 3,
            running: 1,
            done: 1,
            ..Default::default()
        });
        progress.task_started(TaskId::from(0), "out.o", &["cc -c in.c".to_string()]);
        progress.task_finished(
            TaskId::from(0),
            "out.o",
            &TaskResult {
                status: 2,
                output: b"in.c:1: error\n".to_vec(),
            },
        );
        let text = String::from_utf8(progress.into_writer()).unwrap();
        assert_eq!(
            text,
            "[2/3] out.o\ncc -c in.c\nin.c:1: error\nfailed: out.o (exit status 2)\n"
        );
    }
}
