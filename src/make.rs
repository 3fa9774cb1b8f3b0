//! A Makefile front-end: parses the common subset of make syntax and
//! populates a build graph from it.
//!
//! Supported: variable assignment with `=`, `:=`, `::=`, `?=` and `+=`;
//! rules with several targets and prerequisites, an optional `; recipe`,
//! and tab-indented recipe lines with `@`, `-` and `+` prefixes; grouped
//! targets (`&:`); line continuations; comments; `.PHONY`.  Pattern rules,
//! conditionals, functions and `include` are not.

use crate::action::CommandAction;
use crate::env::{Env, Value};
use crate::graph::{Graph, NodeId};
use crate::scan::{IncludeScanner, Scanner};
use crate::task::{Action, Task};
use anyhow::{bail, Context};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Sources with these suffixes get their `#include`s scanned.
const C_SUFFIXES: &[&str] = &[".c", ".C", ".cc", ".cpp", ".cxx", ".m", ".mm"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub command: String,
    /// `-` prefix.
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub targets: Vec<String>,
    pub prereqs: Vec<String>,
    pub recipes: Vec<Recipe>,
    /// `&:`: the targets are produced together by one run of the recipe.
    pub grouped: bool,
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct Makefile {
    pub filename: String,
    pub vars: Env,
    pub rules: Vec<Rule>,
    pub phony: BTreeSet<String>,
    /// Targets of the first ordinary rule.
    pub defaults: Vec<String>,
}

enum Section {
    Top,
    Rule(usize),
    /// A rule whose recipe lines are accepted and dropped.
    Ignored,
}

pub fn read(path: &Path) -> anyhow::Result<Makefile> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse(&path.display().to_string(), &text)
}

pub fn parse(filename: &str, text: &str) -> anyhow::Result<Makefile> {
    let mut mf = Makefile {
        filename: filename.to_owned(),
        ..Default::default()
    };
    let mut context = Section::Top;
    for (lineno, raw) in logical_lines(text) {
        if let Some(command) = raw.strip_prefix('\t') {
            match context {
                Section::Rule(i) => {
                    if let Some(recipe) = recipe(command) {
                        mf.rules[i].recipes.push(recipe);
                    }
                    continue;
                }
                Section::Ignored => continue,
                Section::Top => {}
            }
        }
        let line = strip_comment(&raw);
        if line.trim().is_empty() {
            continue;
        }
        context = Section::Top;

        if let Some((name, op, value)) = assignment(&line) {
            mf.assign(name, op, value);
            continue;
        }
        if line.contains(':') {
            context = mf.add_rule(&line, lineno);
            continue;
        }
        let word = line.split_whitespace().next().unwrap_or("");
        bail!("{}:{}: unsupported line starting with {:?}", filename, lineno, word);
    }
    Ok(mf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Recursive,
    Simple,
    Conditional,
    Append,
}

/// Split `NAME op value`; None if the line isn't an assignment.
fn assignment(line: &str) -> Option<(&str, AssignOp, &str)> {
    let eq = line.find('=')?;
    let bytes = line.as_bytes();
    let (name_end, op) = match eq.checked_sub(1).map(|i| bytes[i]) {
        Some(b':') if eq >= 2 && bytes[eq - 2] == b':' => (eq - 2, AssignOp::Simple),
        Some(b':') => (eq - 1, AssignOp::Simple),
        Some(b'?') => (eq - 1, AssignOp::Conditional),
        Some(b'+') => (eq - 1, AssignOp::Append),
        _ => (eq, AssignOp::Recursive),
    };
    if let Some(colon) = line.find(':') {
        if colon < name_end {
            // "target: VAR=value" is a rule.
            return None;
        }
    }
    let name = line[..name_end].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, op, line[eq + 1..].trim()))
}

fn recipe(command: &str) -> Option<Recipe> {
    let mut rest = command.trim_start();
    let mut ignore_errors = false;
    loop {
        match rest.chars().next() {
            // Echo suppression and "run even under -n" have no meaning here.
            Some('@') | Some('+') => rest = rest[1..].trim_start(),
            Some('-') => {
                ignore_errors = true;
                rest = rest[1..].trim_start();
            }
            _ => break,
        }
    }
    if rest.trim().is_empty() {
        return None;
    }
    Some(Recipe {
        command: rest.trim_end().to_owned(),
        ignore_errors,
    })
}

/// Strip a `#` comment, honouring `\#` as a literal hash.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                out.push('#');
                chars.next();
            }
            '#' => break,
            c => out.push(c),
        }
    }
    out
}

/// Join backslash-continued lines, numbering each logical line by its first
/// physical line.  Recipe lines keep the backslash-newline for the shell.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (i, line) in text.lines().enumerate() {
        let (start, mut acc) = match pending.take() {
            Some((start, mut acc)) => {
                if acc.starts_with('\t') {
                    acc.push('\n');
                    acc.push_str(line.strip_prefix('\t').unwrap_or(line));
                } else {
                    acc.push(' ');
                    acc.push_str(line.trim_start());
                }
                (start, acc)
            }
            None => (i + 1, line.to_owned()),
        };
        let trailing = acc.len() - acc.trim_end_matches('\\').len();
        if trailing % 2 == 1 {
            if !acc.starts_with('\t') {
                acc.pop();
                let trimmed = acc.trim_end().len();
                acc.truncate(trimmed);
            }
            pending = Some((start, acc));
        } else {
            lines.push((start, acc));
        }
    }
    if let Some(last) = pending {
        lines.push(last);
    }
    lines
}

impl Makefile {
    fn assign(&mut self, name: &str, op: AssignOp, value: &str) {
        match op {
            AssignOp::Recursive => self.vars.set(name, value),
            AssignOp::Simple => {
                let expanded = self.vars.subst(value);
                self.vars.set(name, expanded);
            }
            AssignOp::Conditional => {
                if !self.vars.contains(name) {
                    self.vars.set(name, value);
                }
            }
            AssignOp::Append => {
                let joined = match self.vars.get(name) {
                    Some(Value::Str(old)) if !old.is_empty() => format!("{} {}", old, value),
                    Some(Value::List(old)) if !old.is_empty() => {
                        format!("{} {}", old.join(" "), value)
                    }
                    _ => value.to_owned(),
                };
                self.vars.set(name, joined);
            }
        }
    }

    fn add_rule(&mut self, line: &str, lineno: usize) -> Section {
        let colon = match line.find(':') {
            Some(colon) => colon,
            None => return Section::Top,
        };
        let mut head = &line[..colon];
        let mut grouped = false;
        if let Some(h) = head.strip_suffix('&') {
            head = h;
            grouped = true;
        }
        let mut rest = &line[colon + 1..];
        if let Some(r) = rest.strip_prefix(':') {
            // Double-colon rules are treated as ordinary ones.
            rest = r;
        }
        let (prereqs, inline) = match rest.find(';') {
            Some(i) => (&rest[..i], recipe(&rest[i + 1..])),
            None => (rest, None),
        };
        let words = |s: &str| -> Vec<String> {
            self.vars
                .subst(s)
                .split_whitespace()
                .filter(|w| *w != "|")
                .map(str::to_owned)
                .collect()
        };
        let targets = words(head);
        let prereqs = words(prereqs);

        if targets.iter().any(|t| t == ".PHONY") {
            self.phony.extend(prereqs);
            return Section::Ignored;
        }
        if targets.iter().any(|t| is_special(t)) {
            return Section::Ignored;
        }
        if targets.iter().any(|t| t.contains('%')) {
            warn!("{}:{}: pattern rules are not supported; ignored", self.filename, lineno);
            return Section::Ignored;
        }
        if targets.is_empty() {
            return Section::Ignored;
        }
        if self.defaults.is_empty() {
            self.defaults = targets.clone();
        }
        self.rules.push(Rule {
            targets,
            prereqs,
            recipes: inline.into_iter().collect(),
            grouped,
            line: lineno,
        });
        Section::Rule(self.rules.len() - 1)
    }

    /// Create nodes, tasks and edges for every rule.  Returns the default
    /// targets.
    pub fn load(&self, graph: &mut Graph) -> anyhow::Result<Vec<NodeId>> {
        let scanner: Arc<dyn Scanner> = Arc::new(IncludeScanner::default());

        // Rules with recipes first, so prerequisite-only rules for the same
        // target can merge into the task.
        for rule in self.rules.iter().filter(|r| !r.recipes.is_empty()) {
            let sources: Vec<NodeId> = rule.prereqs.iter().map(|p| self.node(graph, p)).collect();
            let actions: Vec<Arc<dyn Action>> = rule
                .recipes
                .iter()
                .map(|r| {
                    let mut action = CommandAction::new(r.command.clone());
                    action.ignore_errors = r.ignore_errors;
                    Arc::new(action) as Arc<dyn Action>
                })
                .collect();
            let scan = sources.iter().any(|&s| {
                graph
                    .node(s)
                    .fs_entry()
                    .map_or(false, |e| C_SUFFIXES.contains(&e.suffix()))
            });
            let groups: Vec<&[String]> = if rule.grouped {
                vec![&rule.targets[..]]
            } else {
                rule.targets.chunks(1).collect()
            };
            for group in groups {
                let targets: Vec<NodeId> = group.iter().map(|t| self.node(graph, t)).collect();
                let mut task = Task::new(self.vars.clone(), targets.clone(), sources.clone(), actions.clone());
                if scan {
                    task = task.with_scanner(scanner.clone());
                }
                graph
                    .add_task(task)
                    .with_context(|| format!("{}:{}", self.filename, rule.line))?;
                for (name, &id) in group.iter().zip(&targets) {
                    if self.phony.contains(name) {
                        graph.set_always_build(id);
                    }
                }
            }
        }

        for rule in self.rules.iter().filter(|r| r.recipes.is_empty()) {
            let sources: Vec<NodeId> = rule.prereqs.iter().map(|p| self.node(graph, p)).collect();
            for target in &rule.targets {
                let id = self.node(graph, target);
                match graph.node(id).task() {
                    Some(task) => graph.add_sources(task, &sources),
                    None => {
                        for &source in &sources {
                            graph.add_edge(id, source);
                        }
                    }
                }
            }
        }

        Ok(self.defaults.iter().map(|t| self.node(graph, t)).collect())
    }

    fn node(&self, graph: &mut Graph, name: &str) -> NodeId {
        if self.phony.contains(name) {
            graph.add_alias(name)
        } else {
            graph.add_entry(name, None)
        }
    }
}

/// `.SUFFIXES`, `.DEFAULT` and friends.
fn is_special(target: &str) -> bool {
    target.len() > 1
        && target.starts_with('.')
        && target[1..].chars().all(|c| c.is_ascii_uppercase() || c == '_')
}
