//! Persistence boundary for computed layouts.
//!
//! Rows mirror the `node_positions` table: one row per entity id, tagged with a scope and the
//! fingerprint of the layout that produced it. Saving a scope replaces every row of that scope.

use crate::error::Result;
use crate::graph::{Position, PositionMap, PreviousLayout};
use crate::hash::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_SCOPE: &str = "global";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePositionRecord {
    pub entity_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub scope: String,
    pub layout_hash: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Positions of one scope together with the fingerprint they were computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLayout {
    pub positions: PositionMap,
    pub fingerprint: Fingerprint,
}

impl StoredLayout {
    pub fn into_previous(self) -> PreviousLayout {
        PreviousLayout::new(self.positions).with_fingerprint(self.fingerprint)
    }
}

pub trait PositionStore {
    /// Positions and fingerprint of `scope`, or `None` when nothing was saved there.
    fn load(&self, scope: &str) -> Result<Option<StoredLayout>>;

    /// Replaces every row of `scope`. Rows that survive keep their `created_at`.
    fn save(&mut self, scope: &str, positions: &PositionMap, fingerprint: Fingerprint)
    -> Result<()>;

    /// Drops every row of every scope, forcing the next layout to start cold.
    fn clear(&mut self) -> Result<()>;
}

/// Rows keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq)]
struct PositionTable {
    rows: BTreeMap<String, NodePositionRecord>,
}

impl PositionTable {
    fn from_records(records: Vec<NodePositionRecord>) -> Self {
        Self {
            rows: records
                .into_iter()
                .map(|r| (r.entity_id.clone(), r))
                .collect(),
        }
    }

    fn records(&self) -> Vec<&NodePositionRecord> {
        self.rows.values().collect()
    }

    fn load(&self, scope: &str) -> Option<StoredLayout> {
        let mut rows = self.rows.values().filter(|r| r.scope == scope).peekable();
        let fingerprint = rows.peek()?.layout_hash;
        let positions = rows
            .map(|r| (r.entity_id.clone(), Position::new(r.x, r.y, r.z)))
            .collect();
        Some(StoredLayout {
            positions,
            fingerprint,
        })
    }

    fn save(
        &mut self,
        scope: &str,
        positions: &PositionMap,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) {
        let mut created: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for (id, row) in std::mem::take(&mut self.rows) {
            if row.scope == scope {
                created.insert(id, row.created_at);
            } else if !positions.contains_key(&id) {
                self.rows.insert(id, row);
            }
        }
        for (id, p) in positions {
            let created_at = created.get(id).copied().unwrap_or(now);
            self.rows.insert(
                id.clone(),
                NodePositionRecord {
                    entity_id: id.clone(),
                    x: p.x,
                    y: p.y,
                    z: p.z,
                    scope: scope.to_string(),
                    layout_hash: fingerprint,
                    created_at,
                    updated_at: now,
                },
            );
        }
    }
}

/// Store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: PositionTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NodePositionRecord> {
        self.table.records().into_iter().cloned().collect()
    }
}

impl PositionStore for MemoryStore {
    fn load(&self, scope: &str) -> Result<Option<StoredLayout>> {
        Ok(self.table.load(scope))
    }

    fn save(
        &mut self,
        scope: &str,
        positions: &PositionMap,
        fingerprint: Fingerprint,
    ) -> Result<()> {
        self.table.save(scope, positions, fingerprint, Utc::now());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.table.rows.clear();
        Ok(())
    }
}

/// Store backed by a JSON array of [`NodePositionRecord`]s.
///
/// The file is re-read on every call and rewritten through a sibling temp file plus rename, so
/// readers never observe a half-written table. A missing file reads as an empty table.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PositionTable> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PositionTable::default());
            }
            Err(err) => return Err(err.into()),
        };
        if text.trim().is_empty() {
            return Ok(PositionTable::default());
        }
        let records: Vec<NodePositionRecord> = serde_json::from_str(&text)?;
        Ok(PositionTable::from_records(records))
    }

    fn write(&self, table: &PositionTable) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, &table.records())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), rows = table.rows.len(), "position store written");
        Ok(())
    }
}

impl PositionStore for JsonFileStore {
    fn load(&self, scope: &str) -> Result<Option<StoredLayout>> {
        Ok(self.read()?.load(scope))
    }

    fn save(
        &mut self,
        scope: &str,
        positions: &PositionMap,
        fingerprint: Fingerprint,
    ) -> Result<()> {
        let mut table = self.read()?;
        table.save(scope, positions, fingerprint, Utc::now());
        self.write(&table)
    }

    fn clear(&mut self) -> Result<()> {
        self.write(&PositionTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn positions(ids: &[&str]) -> PositionMap {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), Position::new(i as f64, 0.0, 0.0)))
            .collect()
    }

    #[test]
    fn save_replaces_the_scope_and_keeps_created_at() {
        let mut table = PositionTable::default();
        table.save("global", &positions(&["a", "b"]), fp(1), at(10));
        table.save("global", &positions(&["b", "c"]), fp(2), at(20));

        let loaded = table.load("global").unwrap();
        assert_eq!(loaded.fingerprint, fp(2));
        assert_eq!(loaded.positions.keys().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(table.rows["b"].created_at, at(10));
        assert_eq!(table.rows["b"].updated_at, at(20));
        assert_eq!(table.rows["c"].created_at, at(20));
    }

    #[test]
    fn scopes_are_independent_and_entity_id_is_the_key() {
        let mut table = PositionTable::default();
        table.save("global", &positions(&["a", "b"]), fp(1), at(1));
        table.save("focus", &positions(&["x"]), fp(2), at(2));
        assert_eq!(table.load("global").unwrap().positions.len(), 2);
        assert_eq!(table.load("focus").unwrap().fingerprint, fp(2));
        assert!(table.load("other").is_none());

        // Saving `b` under another scope moves its single row.
        table.save("focus", &positions(&["b"]), fp(3), at(3));
        assert_eq!(table.rows["b"].scope, "focus");
        assert_eq!(table.rows["b"].created_at, at(3));
        assert_eq!(table.load("global").unwrap().positions.len(), 1);
        assert!(!table.rows.contains_key("x"));
    }

    #[test]
    fn memory_store_clear_wipes_every_scope() {
        let mut store = MemoryStore::new();
        store.save("a", &positions(&["1"]), fp(1)).unwrap();
        store.save("b", &positions(&["2"]), fp(1)).unwrap();
        store.clear().unwrap();
        assert!(store.load("a").unwrap().is_none());
        assert!(store.records().is_empty());
    }
}
