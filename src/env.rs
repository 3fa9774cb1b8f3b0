//! Execution environments: the variable bindings a task's actions run
//! against, and `$VAR` expansion over them.

use std::collections::BTreeMap;

/// Nested expansion stops at this depth, leaving the reference unexpanded.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
}

impl Value {
    pub fn to_list(&self) -> Vec<String> {
        match self {
            Value::Str(s) => s.split_whitespace().map(str::to_owned).collect(),
            Value::List(l) => l.clone(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::List(l) => f.write_str(&l.join(" ")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(l: Vec<String>) -> Self {
        Value::List(l)
    }
}

/// A snapshot of variable bindings.  Tasks capture one when they are
/// created and each execution works against a private copy of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Env::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// A variable's value as a list of (expanded) words; empty if unset.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        match self.vars.get(name) {
            None => Vec::new(),
            Some(Value::List(l)) => l.iter().map(|s| self.subst(s)).collect(),
            Some(v @ Value::Str(_)) => Value::Str(self.subst(&v.to_string())).to_list(),
        }
    }

    /// Expand variable references in `text`.
    ///
    /// Understands `$NAME`, `${NAME}`, `$(NAME)`, `$$` for a literal dollar,
    /// and the make automatic variables `$@` (first target), `$<` (first
    /// source) and `$^` (all sources).  Unset variables expand to nothing.
    /// Values are expanded recursively.
    pub fn subst(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        self.subst_into(&mut out, text, 0);
        out
    }

    fn subst_into(&self, out: &mut String, text: &str, depth: usize) {
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let name: &str = match chars.peek().copied() {
                None => {
                    out.push('$');
                    continue;
                }
                Some((_, '$')) => {
                    chars.next();
                    out.push('$');
                    continue;
                }
                Some((_, '@')) => {
                    chars.next();
                    "TARGET"
                }
                Some((_, '<')) => {
                    chars.next();
                    "SOURCE"
                }
                Some((_, '^')) => {
                    chars.next();
                    "SOURCES"
                }
                Some((j, open @ ('(' | '{'))) => {
                    let close = if open == '(' { ')' } else { '}' };
                    match text[j + 1..].find(close) {
                        Some(len) => {
                            let name = &text[j + 1..j + 1 + len];
                            // Skip over the name and the closing bracket.
                            while let Some(&(k, _)) = chars.peek() {
                                if k > j + len + 1 {
                                    break;
                                }
                                chars.next();
                            }
                            name
                        }
                        None => {
                            out.push_str(&text[i..]);
                            return;
                        }
                    }
                }
                Some((j, _)) => {
                    let len = text[j..]
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .unwrap_or(text.len() - j);
                    if len == 0 {
                        out.push('$');
                        continue;
                    }
                    for _ in 0..len {
                        chars.next();
                    }
                    &text[j..j + len]
                }
            };
            self.expand_var(out, name, depth);
        }
    }

    fn expand_var(&self, out: &mut String, name: &str, depth: usize) {
        let value = match self.vars.get(name) {
            None => return,
            Some(v) => v.to_string(),
        };
        if depth >= MAX_DEPTH {
            out.push_str(&value);
            return;
        }
        self.subst_into(out, &value, depth + 1);
    }
}
