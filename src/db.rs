//! The signature store: what the previous run recorded about every node, used
//! to decide what is up to date, and rewritten with this run's view on close.
//!
//! Backed by sqlite.  Records are loaded on first touch, mutated in memory
//! by the coordinating thread during the build, and written back in one
//! transaction by `close`.  Persistence faults never abort a build; they are
//! logged and the affected node is treated as having no prior record.

use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId};
use crate::hash::Signature;
use crate::node::{ChangePolicy, NodeKind};
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Bump when the table layout changes; older stores are dropped and
/// recreated.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r"
    CREATE TABLE nodes (
        id INTEGER PRIMARY KEY,
        type TEXT NOT NULL,
        name TEXT NOT NULL,
        existed INTEGER,
        timestamp INTEGER,
        signature BLOB,
        task_signature BLOB,
        task_status INTEGER,
        UNIQUE (type, name)
    );
    CREATE TABLE dependencies (
        node INTEGER NOT NULL,
        dependency INTEGER NOT NULL,
        PRIMARY KEY (node, dependency)
    );
    CREATE TABLE scan_cache (
        node INTEGER NOT NULL,
        reference TEXT NOT NULL,
        external INTEGER NOT NULL,
        PRIMARY KEY (node, reference, external)
    );
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("signature store has schema version {found}, newer than {supported}")]
    TooNew { found: i32, supported: i32 },
}

/// A reference extracted from a scanned file, e.g. one `#include`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanRef {
    /// Angle-bracket style: not searched relative to the including file.
    pub external: bool,
    pub reference: String,
}

/// Persisted state for one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureRecord {
    /// Database identity; None if the record couldn't be loaded.
    pub id: Option<i64>,
    /// None: never recorded.
    pub existed: Option<bool>,
    pub timestamp: Option<i64>,
    pub signature: Option<Signature>,
    /// Signature of the task that last produced this node.
    pub task_signature: Option<Signature>,
    /// Exit status of that task; None if it hasn't completed since it was
    /// last found out of date.
    pub task_status: Option<i32>,
    /// Database identities of the node's dependencies as of the last run.
    pub dependencies: BTreeSet<i64>,
    /// Loaded on demand, and only rewritten if it was loaded.
    scan_cache: Option<BTreeSet<ScanRef>>,
}

pub struct SignatureStore {
    conn: Connection,
    records: FxHashMap<NodeId, SignatureRecord>,
    /// Ids resolved for nodes that were never touched themselves.
    ids: FxHashMap<NodeId, i64>,
}

impl SignatureStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::TooNew {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version < SCHEMA_VERSION {
            if version > 0 {
                debug!("signature store version {} is stale; resetting", version);
            }
            conn.execute_batch(
                "DROP TABLE IF EXISTS nodes;
                 DROP TABLE IF EXISTS dependencies;
                 DROP TABLE IF EXISTS scan_cache;",
            )?;
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(SignatureStore {
            conn,
            records: FxHashMap::default(),
            ids: FxHashMap::default(),
        })
    }

    /// The mutable record for `id`, loaded (or created) on first touch.
    pub fn record(&mut self, graph: &Graph, id: NodeId) -> &mut SignatureRecord {
        if !self.records.contains_key(&id) {
            let record = match self.load(graph, id) {
                Ok(record) => record,
                Err(err) => {
                    warn!("loading record for {}: {}", graph.node(id).name(), err);
                    SignatureRecord::default()
                }
            };
            self.records.insert(id, record);
        }
        // Inserted above.
        self.records.entry(id).or_default()
    }

    pub fn is_touched(&self, id: NodeId) -> bool {
        self.records.contains_key(&id)
    }

    fn load(&mut self, graph: &Graph, id: NodeId) -> Result<SignatureRecord, StoreError> {
        let node = graph.node(id);
        let row = self
            .conn
            .query_row(
                "SELECT id, existed, timestamp, signature, task_signature, task_status
                 FROM nodes WHERE type = ?1 AND name = ?2",
                params![node.type_name(), node.name()],
                |row| {
                    Ok(SignatureRecord {
                        id: Some(row.get(0)?),
                        existed: row.get(1)?,
                        timestamp: row.get(2)?,
                        signature: blob_signature(row.get(3)?),
                        task_signature: blob_signature(row.get(4)?),
                        task_status: row.get(5)?,
                        dependencies: BTreeSet::new(),
                        scan_cache: None,
                    })
                },
            )
            .optional()?;
        let mut record = match row {
            Some(record) => record,
            None => {
                self.conn.execute(
                    "INSERT INTO nodes (type, name) VALUES (?1, ?2)",
                    params![node.type_name(), node.name()],
                )?;
                return Ok(SignatureRecord {
                    id: Some(self.conn.last_insert_rowid()),
                    ..Default::default()
                });
            }
        };
        let mut stmt = self
            .conn
            .prepare_cached("SELECT dependency FROM dependencies WHERE node = ?1")?;
        let deps = stmt.query_map(params![record.id], |row| row.get::<_, i64>(0))?;
        for dep in deps {
            record.dependencies.insert(dep?);
        }
        Ok(record)
    }

    /// The database identity of `id`, without touching its record.
    pub fn ensure_id(&mut self, graph: &Graph, id: NodeId) -> Option<i64> {
        if let Some(db_id) = self.records.get(&id).and_then(|r| r.id) {
            return Some(db_id);
        }
        if let Some(&db_id) = self.ids.get(&id) {
            return Some(db_id);
        }
        let node = graph.node(id);
        let result = (|| -> Result<i64, StoreError> {
            self.conn.execute(
                "INSERT OR IGNORE INTO nodes (type, name) VALUES (?1, ?2)",
                params![node.type_name(), node.name()],
            )?;
            Ok(self.conn.query_row(
                "SELECT id FROM nodes WHERE type = ?1 AND name = ?2",
                params![node.type_name(), node.name()],
                |row| row.get(0),
            )?)
        })();
        match result {
            Ok(db_id) => {
                self.ids.insert(id, db_id);
                Some(db_id)
            }
            Err(err) => {
                warn!("resolving id for {}: {}", node.name(), err);
                None
            }
        }
    }

    /// The node's cached scan results, loaded on first use.  Whatever is left
    /// here is written back on close.
    pub fn scan_cache_mut(&mut self, graph: &Graph, id: NodeId) -> &mut BTreeSet<ScanRef> {
        self.record(graph, id);
        let db_id = self.records.get(&id).and_then(|r| r.id);
        let loaded = self.records.get(&id).map_or(false, |r| r.scan_cache.is_some());
        if !loaded {
            let refs = match db_id {
                Some(db_id) => self.load_scan_cache(db_id).unwrap_or_else(|err| {
                    warn!("loading scan cache for {}: {}", graph.node(id).name(), err);
                    BTreeSet::new()
                }),
                None => BTreeSet::new(),
            };
            self.records.entry(id).or_default().scan_cache = Some(refs);
        }
        self.records
            .entry(id)
            .or_default()
            .scan_cache
            .get_or_insert_with(BTreeSet::new)
    }

    fn load_scan_cache(&self, db_id: i64) -> Result<BTreeSet<ScanRef>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT reference, external FROM scan_cache WHERE node = ?1")?;
        let rows = stmt.query_map(params![db_id], |row| {
            Ok(ScanRef {
                reference: row.get(0)?,
                external: row.get(1)?,
            })
        })?;
        let mut refs = BTreeSet::new();
        for r in rows {
            refs.insert(r?);
        }
        Ok(refs)
    }

    /// Fill each touched node's record with its current on-disk state and
    /// dependency set, then write everything back in one transaction.
    /// Failures are logged, never returned.
    pub fn close(mut self, graph: &Graph, fs: &dyn FileSystem) {
        let mut touched: Vec<NodeId> = self.records.keys().copied().collect();
        touched.sort();

        let to_hash = self.observe(graph, fs, &touched);
        let hashed: Vec<(NodeId, Option<Signature>)> = to_hash
            .par_iter()
            .map(|(id, path)| (*id, fs.signature(path).ok()))
            .collect();
        for (id, sig) in hashed {
            if let Some(record) = self.records.get_mut(&id) {
                record.signature = sig;
            }
        }

        for &id in &touched {
            let mut deps = BTreeSet::new();
            for &dep in graph.node(id).deps() {
                if let Some(db_id) = self.ensure_id(graph, dep) {
                    deps.insert(db_id);
                }
            }
            if let Some(record) = self.records.get_mut(&id) {
                record.dependencies = deps;
            }
        }

        if let Err(err) = self.write(graph, &touched) {
            warn!("writing signature store: {}", err);
        }
    }

    /// Record existence and timestamps, reusing signatures where the content
    /// is known not to have moved.  Returns the files that need hashing.
    fn observe(
        &mut self,
        graph: &Graph,
        fs: &dyn FileSystem,
        touched: &[NodeId],
    ) -> Vec<(NodeId, PathBuf)> {
        let mut to_hash = Vec::new();
        for &id in touched {
            let node = graph.node(id);
            let record = match self.records.get_mut(&id) {
                Some(record) => record,
                None => continue,
            };
            let entry = match &node.kind {
                NodeKind::File(entry) => entry,
                NodeKind::Alias(_) | NodeKind::Dummy(_) => {
                    record.existed = Some(true);
                    record.timestamp = None;
                    record.signature = None;
                    continue;
                }
            };
            let prev_stamp = record.timestamp;
            match fs.stat(&entry.abspath) {
                Err(err) => {
                    warn!("stat {}: {}", entry.abspath.display(), err);
                    record.existed = None;
                    record.timestamp = None;
                    record.signature = None;
                }
                Ok(MTime::Missing) => {
                    record.existed = Some(false);
                    record.timestamp = None;
                    record.signature = None;
                }
                Ok(MTime::Stamp(stamp)) => {
                    record.existed = Some(true);
                    record.timestamp = Some(stamp);
                    if entry.is_file() == Some(false) || entry.policy == ChangePolicy::Timestamp {
                        record.signature = None;
                    } else if prev_stamp == Some(stamp) && record.signature.is_some() {
                        // Content can't have moved without the timestamp.
                    } else if let Some(sig) = node.cached_signature() {
                        record.signature = Some(sig);
                    } else {
                        to_hash.push((id, entry.abspath.clone()));
                    }
                }
            }
        }
        to_hash
    }

    fn write(&mut self, graph: &Graph, touched: &[NodeId]) -> Result<(), StoreError> {
        let mut tx = self.conn.transaction()?;
        for &id in touched {
            let record = match self.records.get(&id) {
                Some(record) => record,
                None => continue,
            };
            let node = graph.node(id);
            let sp = tx.savepoint()?;
            let result = (|| -> Result<(), StoreError> {
                sp.execute(
                    "INSERT INTO nodes
                       (type, name, existed, timestamp, signature, task_signature, task_status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT (type, name) DO UPDATE SET
                       existed = excluded.existed,
                       timestamp = excluded.timestamp,
                       signature = excluded.signature,
                       task_signature = excluded.task_signature,
                       task_status = excluded.task_status",
                    params![
                        node.type_name(),
                        node.name(),
                        record.existed,
                        record.timestamp,
                        record.signature.as_ref().map(|s| &s.0[..]),
                        record.task_signature.as_ref().map(|s| &s.0[..]),
                        record.task_status,
                    ],
                )?;
                let db_id: i64 = sp.query_row(
                    "SELECT id FROM nodes WHERE type = ?1 AND name = ?2",
                    params![node.type_name(), node.name()],
                    |row| row.get(0),
                )?;
                sp.execute("DELETE FROM dependencies WHERE node = ?1", params![db_id])?;
                for dep in &record.dependencies {
                    sp.execute(
                        "INSERT INTO dependencies (node, dependency) VALUES (?1, ?2)",
                        params![db_id, dep],
                    )?;
                }
                if let Some(refs) = &record.scan_cache {
                    sp.execute("DELETE FROM scan_cache WHERE node = ?1", params![db_id])?;
                    for r in refs {
                        sp.execute(
                            "INSERT INTO scan_cache (node, reference, external) VALUES (?1, ?2, ?3)",
                            params![db_id, r.reference, r.external],
                        )?;
                    }
                }
                Ok(())
            })();
            match result {
                Ok(()) => sp.commit()?,
                // Dropping the savepoint rolls back just this node.
                Err(err) => warn!("writing record for {}: {}", node.name(), err),
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn blob_signature(blob: Option<Vec<u8>>) -> Option<Signature> {
    blob.and_then(|b| Signature::from_slice(&b))
}
