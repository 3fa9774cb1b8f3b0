//! Implicit dependency scanning: the protocol the build-order walk drives,
//! and a C-family `#include` scanner built on it.

use crate::db::{ScanRef, SignatureStore};
use crate::env::Env;
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId};
use crate::node;
use crate::scanner::Scanner as ByteScanner;
use std::collections::BTreeSet;
use tracing::trace;

/// What a scanner may see and touch while the build order is computed.
pub struct ScanContext<'a> {
    pub graph: &'a mut Graph,
    pub store: &'a mut SignatureStore,
    pub fs: &'a dyn FileSystem,
    /// The scanning task's environment.
    pub env: &'a Env,
}

/// Discovers dependencies that aren't written down in the build
/// description.  Called once per (target, source) pair of a task that owns
/// the scanner; adds edges from `target` to whatever `source` references.
pub trait Scanner: Send + Sync {
    fn scan(&self, cx: &mut ScanContext<'_>, target: NodeId, source: NodeId) -> anyhow::Result<()>;
}

impl<F> Scanner for F
where
    F: Fn(&mut ScanContext<'_>, NodeId, NodeId) -> anyhow::Result<()> + Send + Sync,
{
    fn scan(&self, cx: &mut ScanContext<'_>, target: NodeId, source: NodeId) -> anyhow::Result<()> {
        self(cx, target, source)
    }
}

/// Extract `#include "x"` and `#include <x>` references, ignoring any that
/// are commented out.
pub fn c_includes(buf: &[u8]) -> BTreeSet<ScanRef> {
    let mut refs = BTreeSet::new();
    let mut s = ByteScanner::new(buf);
    let mut in_comment = false;
    while !s.at_end() {
        if !in_comment {
            s.skip_spaces();
            if s.skip('#') {
                s.skip_spaces();
                let directive = s.read_ident();
                if directive == "include" || directive == "import" {
                    s.skip_spaces();
                    let found = if s.skip('"') {
                        s.read_until('"').map(|r| (false, r))
                    } else if s.skip('<') {
                        s.read_until('>').map(|r| (true, r))
                    } else {
                        None
                    };
                    if let Some((external, reference)) = found {
                        if !reference.is_empty() {
                            refs.insert(ScanRef {
                                external,
                                reference,
                            });
                        }
                    }
                }
            }
        }
        skip_rest_of_line(&mut s, &mut in_comment);
    }
    refs
}

fn skip_rest_of_line(s: &mut ByteScanner, in_comment: &mut bool) {
    while !s.at_end() {
        match (s.peek(), s.peek_at(1)) {
            ('\n', _) => {
                s.next();
                return;
            }
            ('*', '/') if *in_comment => {
                s.next();
                s.next();
                *in_comment = false;
            }
            ('/', '*') if !*in_comment => {
                s.next();
                s.next();
                *in_comment = true;
            }
            ('/', '/') if !*in_comment => {
                s.skip_line();
                return;
            }
            _ => s.next(),
        }
    }
}

type Extractor = fn(&[u8]) -> BTreeSet<ScanRef>;

/// Scans sources for references, resolves them against the including file's
/// directory and a search path taken from the task environment, and adds an
/// edge for each one found.  Recurses into a referenced file only when its
/// edge is new, which terminates on cyclic references.
pub struct IncludeScanner {
    extract: Extractor,
    path_var: String,
}

impl Default for IncludeScanner {
    fn default() -> Self {
        IncludeScanner {
            extract: c_includes,
            path_var: "CPPPATH".to_owned(),
        }
    }
}

impl IncludeScanner {
    pub fn new(extract: Extractor, path_var: impl Into<String>) -> Self {
        IncludeScanner {
            extract,
            path_var: path_var.into(),
        }
    }

    fn scan_file(
        &self,
        cx: &mut ScanContext<'_>,
        target: NodeId,
        source: NodeId,
        search: &[String],
    ) -> anyhow::Result<()> {
        let dir = match cx.graph.node(source).fs_entry() {
            Some(entry) if entry.is_file() != Some(false) => entry.dir().to_owned(),
            _ => return Ok(()),
        };
        for r in self.references(cx, source)? {
            let dep = match self.resolve(cx, &dir, &r, search) {
                Some(dep) => dep,
                None => {
                    trace!("{}: unresolved reference {:?}", cx.graph.node(source).name(), r.reference);
                    continue;
                }
            };
            if dep != target && cx.graph.add_edge(target, dep) {
                self.scan_file(cx, target, dep, search)?;
            }
        }
        Ok(())
    }

    /// The references in `source`, from the scan cache if the file is
    /// unchanged since it was last scanned.
    fn references(&self, cx: &mut ScanContext<'_>, source: NodeId) -> anyhow::Result<BTreeSet<ScanRef>> {
        let abspath = match cx.graph.node(source).fs_entry() {
            Some(entry) => entry.abspath.clone(),
            None => return Ok(BTreeSet::new()),
        };
        if cx.fs.stat(&abspath)? == MTime::Missing {
            // Not built yet; nothing to scan.
            return Ok(BTreeSet::new());
        }
        if node::unchanged(cx.graph, cx.store, cx.fs, source) {
            let cached = cx.store.scan_cache_mut(cx.graph, source);
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }
        let content = cx.fs.read(&abspath)?;
        let refs = (self.extract)(&content);
        *cx.store.scan_cache_mut(cx.graph, source) = refs.clone();
        Ok(refs)
    }

    fn resolve(&self, cx: &mut ScanContext<'_>, dir: &str, r: &ScanRef, search: &[String]) -> Option<NodeId> {
        let local = if r.external { None } else { Some(dir) };
        for d in local.into_iter().chain(search.iter().map(String::as_str)) {
            let candidate = join(d, &r.reference);
            if let Some(id) = cx.graph.get_entry(&candidate) {
                return Some(id);
            }
            let abspath = cx.graph.root().join(&candidate);
            if let Ok(mtime) = cx.fs.stat(&abspath) {
                if mtime.exists() {
                    return Some(cx.graph.add_file(&candidate));
                }
            }
        }
        None
    }
}

fn join(dir: &str, reference: &str) -> String {
    if reference.starts_with('/') || dir == "." || dir.is_empty() {
        reference.to_owned()
    } else {
        format!("{}/{}", dir, reference)
    }
}

impl Scanner for IncludeScanner {
    fn scan(&self, cx: &mut ScanContext<'_>, target: NodeId, source: NodeId) -> anyhow::Result<()> {
        let search = cx.env.get_list(&self.path_var);
        self.scan_file(cx, target, source, &search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(external: bool, reference: &str) -> ScanRef {
        ScanRef {
            external,
            reference: reference.to_owned(),
        }
    }

    #[test]
    fn extracts_includes() {
        let src = b"#include \"a.h\"\n  #  include <stdio.h>\n#import \"m.h\"\nint x; // #include \"no.h\"\n";
        let refs = c_includes(src);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec![r(false, "a.h"), r(false, "m.h"), r(true, "stdio.h")]
        );
    }

    #[test]
    fn skips_comments() {
        let src = b"/* start\n#include \"hidden.h\"\nend */\n// #include \"line.h\"\n#include \"seen.h\"";
        let refs = c_includes(src);
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![r(false, "seen.h")]);
    }

    #[test]
    fn malformed_lines() {
        let src = b"#include\n#include \"unterminated\n#define X 1\n#include <ok.h>\n";
        let refs = c_includes(src);
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![r(true, "ok.h")]);
    }

    #[test]
    fn join_paths() {
        assert_eq!(join(".", "a.h"), "a.h");
        assert_eq!(join("src", "a.h"), "src/a.h");
        assert_eq!(join("src", "/usr/include/a.h"), "/usr/include/a.h");
    }
}
