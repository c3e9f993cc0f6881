use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use factorlab_core::{Error, Result, Variant};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::db::{from_json, lock, open_connection, parse_ts, storage_err, SharedConnection};
use crate::diff::{diff_lines, DiffSegment};

/// Snapshot fields a version freezes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub code: String,
    pub pseudocode: String,
    pub description: String,
}

impl From<&Variant> for VersionSnapshot {
    fn from(v: &Variant) -> Self {
        Self {
            code: v.code.clone(),
            pseudocode: v.pseudocode.clone(),
            description: v.description.clone(),
        }
    }
}

impl VersionSnapshot {
    /// Apply onto a live variant; the name is not versioned.
    pub fn apply_to(&self, variant: &Variant) -> Variant {
        Variant {
            name: variant.name.clone(),
            code: self.code.clone(),
            pseudocode: self.pseudocode.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMeta {
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_important: bool,
    pub created_by: Option<String>,
}

/// Fields left as None are not touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetaUpdate {
    pub note: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_important: Option<bool>,
}

impl VersionMetaUpdate {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.tags.is_none() && self.is_important.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub id: i64,
    pub comment_id: String,
    pub variant_index: usize,
    /// Per (comment, variant) counter; never reused after deletes.
    pub sequence: i64,
    #[serde(flatten)]
    pub snapshot: VersionSnapshot,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub is_important: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id,
            variant_index: self.variant_index,
            sequence: self.sequence,
            note: self.note.clone(),
            tags: self.tags.clone(),
            is_important: self.is_important,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }

    pub fn created_at_in(&self, tz: &Tz) -> String {
        format_in_zone(&self.created_at, tz)
    }
}

pub fn format_in_zone(ts: &DateTime<Utc>, tz: &Tz) -> String {
    ts.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: i64,
    pub variant_index: usize,
    pub sequence: i64,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub is_important: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub code_diff: Vec<DiffSegment>,
    pub pseudocode_diff: Vec<DiffSegment>,
    pub old_version: VersionSummary,
    pub new_version: VersionSummary,
}

pub struct VersionStore {
    inner: SharedConnection,
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<Version> {
    let tags: String = row.get("tags")?;
    let created_at: String = row.get("created_at")?;
    let variant_index: i64 = row.get("variant_index")?;
    Ok(Version {
        id: row.get("id")?,
        comment_id: row.get("comment_id")?,
        variant_index: variant_index as usize,
        sequence: row.get("sequence")?,
        snapshot: VersionSnapshot {
            code: row.get("code")?,
            pseudocode: row.get("pseudocode")?,
            description: row.get("description")?,
        },
        note: row.get("note")?,
        tags: from_json(&tags, 8)?,
        is_important: row.get::<_, i64>("is_important")? != 0,
        created_by: row.get("created_by")?,
        created_at: parse_ts(&created_at, 11)?,
    })
}

impl VersionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = Self {
            inner: open_connection(db_path, "version")?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = lock(&self.inner)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS code_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                comment_id TEXT NOT NULL,
                variant_index INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                code TEXT NOT NULL,
                pseudocode TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                note TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                is_important INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_versions_variant ON code_versions(comment_id, variant_index, id);

            CREATE TABLE IF NOT EXISTS version_sequences (
                comment_id TEXT NOT NULL,
                variant_index INTEGER NOT NULL,
                last_sequence INTEGER NOT NULL,
                PRIMARY KEY (comment_id, variant_index)
            );
            ",
        )
        .map_err(storage_err("Failed to init version schema"))?;
        Ok(())
    }

    /// Append a version, then prune to `keep`. Returns the new row and the
    /// number of rows pruned.
    pub fn create(
        &self,
        comment_id: &str,
        variant_index: usize,
        snapshot: &VersionSnapshot,
        meta: &VersionMeta,
        keep: usize,
    ) -> Result<(Version, usize)> {
        let version = self.append(comment_id, variant_index, snapshot, meta)?;
        let pruned = self.cleanup(comment_id, variant_index, keep)?;
        Ok((version, pruned))
    }

    /// Append a version without pruning. Restores go through here so the
    /// restored row always survives.
    pub fn append(
        &self,
        comment_id: &str,
        variant_index: usize,
        snapshot: &VersionSnapshot,
        meta: &VersionMeta,
    ) -> Result<Version> {
        let id = {
            let mut conn = lock(&self.inner)?;
            let tx = conn.transaction().map_err(storage_err("Failed to begin transaction"))?;
            let sequence: i64 = tx
                .query_row(
                    "INSERT INTO version_sequences (comment_id, variant_index, last_sequence)
                     VALUES (?1, ?2, 1)
                     ON CONFLICT(comment_id, variant_index) DO UPDATE SET last_sequence = last_sequence + 1
                     RETURNING last_sequence",
                    params![comment_id, variant_index as i64],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to allocate version sequence"))?;

            tx.execute(
                "INSERT INTO code_versions
                    (comment_id, variant_index, sequence, code, pseudocode, description,
                     note, tags, is_important, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    comment_id,
                    variant_index as i64,
                    sequence,
                    snapshot.code,
                    snapshot.pseudocode,
                    snapshot.description,
                    meta.note,
                    serde_json::to_string(&meta.tags)?,
                    meta.is_important as i64,
                    meta.created_by,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(storage_err("Failed to insert version"))?;
            let id = tx.last_insert_rowid();
            tx.commit().map_err(storage_err("Failed to commit version"))?;
            id
        };

        let version = self.require(id)?;
        info!(
            comment_id = %comment_id,
            variant_index,
            version_id = id,
            sequence = version.sequence,
            "Created code version"
        );
        Ok(version)
    }

    /// Newest first.
    pub fn list(&self, comment_id: &str, variant_index: usize) -> Result<Vec<Version>> {
        let conn = lock(&self.inner)?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM code_versions WHERE comment_id = ?1 AND variant_index = ?2 ORDER BY id DESC",
            )
            .map_err(storage_err("Failed to prepare version list"))?;
        let rows = stmt
            .query_map(params![comment_id, variant_index as i64], row_to_version)
            .map_err(storage_err("Failed to list versions"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err("Failed to read version row"))
    }

    pub fn count(&self, comment_id: &str, variant_index: usize) -> Result<usize> {
        let conn = lock(&self.inner)?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM code_versions WHERE comment_id = ?1 AND variant_index = ?2",
                params![comment_id, variant_index as i64],
                |row| row.get(0),
            )
            .map_err(storage_err("Failed to count versions"))?;
        Ok(n as usize)
    }

    pub fn get(&self, id: i64) -> Result<Option<Version>> {
        let conn = lock(&self.inner)?;
        conn.query_row("SELECT * FROM code_versions WHERE id = ?1", params![id], row_to_version)
            .optional()
            .map_err(storage_err("Failed to load version"))
    }

    pub fn require(&self, id: i64) -> Result<Version> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("version {}", id)))
    }

    /// Only note/tags/importance are mutable; the snapshot never changes.
    pub fn update_meta(&self, id: i64, update: &VersionMetaUpdate) -> Result<Version> {
        if !update.is_empty() {
            let tags = update.tags.as_ref().map(serde_json::to_string).transpose()?;
            let conn = lock(&self.inner)?;
            let changed = conn
                .execute(
                    "UPDATE code_versions SET
                        note = CASE WHEN ?1 THEN ?2 ELSE note END,
                        tags = COALESCE(?3, tags),
                        is_important = COALESCE(?4, is_important)
                     WHERE id = ?5",
                    params![
                        update.note.is_some(),
                        update.note,
                        tags,
                        update.is_important.map(|b| b as i64),
                        id
                    ],
                )
                .map_err(storage_err("Failed to update version"))?;
            if changed == 0 {
                return Err(Error::NotFound(format!("version {}", id)));
            }
            debug!(version_id = id, "Updated version metadata");
        }
        self.require(id)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = lock(&self.inner)?;
        let changed = conn
            .execute("DELETE FROM code_versions WHERE id = ?1", params![id])
            .map_err(storage_err("Failed to delete version"))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("version {}", id)));
        }
        info!(version_id = id, "Deleted code version");
        Ok(())
    }

    /// Keep the newest `keep` rows; beyond them only important rows survive.
    pub fn cleanup(&self, comment_id: &str, variant_index: usize, keep: usize) -> Result<usize> {
        let conn = lock(&self.inner)?;
        let deleted = conn
            .execute(
                "DELETE FROM code_versions
                 WHERE is_important = 0 AND id IN (
                    SELECT id FROM code_versions
                    WHERE comment_id = ?1 AND variant_index = ?2
                    ORDER BY id DESC
                    LIMIT -1 OFFSET ?3
                 )",
                params![comment_id, variant_index as i64, keep as i64],
            )
            .map_err(storage_err("Failed to prune versions"))?;
        if deleted > 0 {
            info!(comment_id = %comment_id, variant_index, deleted, keep, "Pruned old code versions");
        }
        Ok(deleted)
    }

    /// Line diff of code and pseudocode, from `old_id` to `new_id`.
    pub fn diff(&self, old_id: i64, new_id: i64) -> Result<VersionDiff> {
        let old = self.require(old_id)?;
        let new = self.require(new_id)?;
        Ok(VersionDiff {
            code_diff: diff_lines(&old.snapshot.code, &new.snapshot.code),
            pseudocode_diff: diff_lines(&old.snapshot.pseudocode, &new.snapshot.pseudocode),
            old_version: old.summary(),
            new_version: new.summary(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{reconstruct_new, reconstruct_old};
    use tempfile::TempDir;

    fn test_store() -> (VersionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::open(&dir.path().join("explore.db")).unwrap();
        (store, dir)
    }

    fn snap(n: usize) -> VersionSnapshot {
        VersionSnapshot {
            code: format!("def calculate_factor(code, date):\n    return {{'v': {}}}, {{}}\n", n),
            pseudocode: format!("step {}\n", n),
            description: format!("rev {}", n),
        }
    }

    fn meta(important: bool) -> VersionMeta {
        VersionMeta {
            note: None,
            tags: vec![],
            is_important: important,
            created_by: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_create_list_newest_first() {
        let (store, _dir) = test_store();
        for i in 0..3 {
            store.create("c1", 0, &snap(i), &meta(false), 20).unwrap();
        }
        store.create("c1", 1, &snap(9), &meta(false), 20).unwrap();
        let list = store.list("c1", 0).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].snapshot, snap(2));
        assert_eq!(list.iter().map(|v| v.sequence).collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(store.count("c1", 1).unwrap(), 1);
    }

    #[test]
    fn test_cleanup_25_plain_deletes_5_oldest() {
        let (store, _dir) = test_store();
        let mut ids = Vec::new();
        for i in 0..25 {
            // Large keep so nothing is pruned while seeding
            ids.push(store.create("c1", 0, &snap(i), &meta(false), 100).unwrap().0.id);
        }
        assert_eq!(store.cleanup("c1", 0, 20).unwrap(), 5);
        let remaining: Vec<i64> = store.list("c1", 0).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(remaining.len(), 20);
        for old in &ids[..5] {
            assert!(!remaining.contains(old));
        }
    }

    #[test]
    fn test_cleanup_protects_important() {
        let (store, _dir) = test_store();
        for i in 0..25 {
            // 3 important among the oldest 10
            let important = matches!(i, 0 | 2 | 4);
            store.create("c1", 0, &snap(i), &meta(important), 100).unwrap();
        }
        assert_eq!(store.cleanup("c1", 0, 20).unwrap(), 2);
        let list = store.list("c1", 0).unwrap();
        assert_eq!(list.len(), 23);
        assert_eq!(list.iter().filter(|v| v.is_important).count(), 3);
    }

    #[test]
    fn test_cleanup_runs_on_create() {
        let (store, _dir) = test_store();
        let mut pruned_total = 0;
        for i in 0..22 {
            pruned_total += store.create("c1", 0, &snap(i), &meta(false), 20).unwrap().1;
        }
        assert_eq!(pruned_total, 2);
        assert_eq!(store.count("c1", 0).unwrap(), 20);
        // Sequence keeps counting after deletes
        let (v, _) = store.create("c1", 0, &snap(99), &meta(false), 20).unwrap();
        assert_eq!(v.sequence, 23);
    }

    #[test]
    fn test_update_meta_only_touches_meta() {
        let (store, _dir) = test_store();
        let (v, _) = store.create("c1", 0, &snap(1), &meta(false), 20).unwrap();
        let updated = store
            .update_meta(v.id, &VersionMetaUpdate {
                note: Some("baseline".to_string()),
                tags: Some(vec!["ofi".to_string()]),
                is_important: Some(true),
            })
            .unwrap();
        assert_eq!(updated.snapshot, v.snapshot);
        assert_eq!(updated.note.as_deref(), Some("baseline"));
        assert_eq!(updated.tags, vec!["ofi"]);
        assert!(updated.is_important);

        // Partial update leaves the rest alone
        let again = store
            .update_meta(v.id, &VersionMetaUpdate { is_important: Some(false), ..Default::default() })
            .unwrap();
        assert_eq!(again.note.as_deref(), Some("baseline"));
        assert!(!again.is_important);

        assert!(matches!(
            store.update_meta(999, &VersionMetaUpdate { note: Some("x".into()), ..Default::default() }),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (store, _dir) = test_store();
        let (v, _) = store.create("c1", 0, &snap(1), &meta(false), 20).unwrap();
        store.delete(v.id).unwrap();
        assert!(store.get(v.id).unwrap().is_none());
        assert!(matches!(store.delete(v.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_diff_reconstructs_both_sides() {
        let (store, _dir) = test_store();
        let (a, _) = store.create("c1", 0, &snap(1), &meta(false), 20).unwrap();
        let (b, _) = store.create("c1", 0, &snap(2), &meta(false), 20).unwrap();
        let d = store.diff(a.id, b.id).unwrap();
        assert_eq!(reconstruct_old(&d.code_diff), a.snapshot.code);
        assert_eq!(reconstruct_new(&d.code_diff), b.snapshot.code);
        assert_eq!(reconstruct_new(&d.pseudocode_diff), b.snapshot.pseudocode);
        assert_eq!(d.old_version.id, a.id);
        assert_eq!(d.new_version.sequence, 2);

        let json = serde_json::to_value(&d).unwrap();
        assert!(json["codeDiff"][0].get("added").is_some());
        assert!(json.get("pseudocodeDiff").is_some());

        assert!(matches!(store.diff(a.id, 404), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_display_timezone() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(format_in_zone(&ts, &chrono_tz::Asia::Shanghai), "2024-01-01 08:00:00");
    }

    #[test]
    fn test_append_does_not_prune() {
        let (store, _dir) = test_store();
        for i in 0..20 {
            store.create("c1", 0, &snap(i), &meta(false), 20).unwrap();
        }
        let oldest = store.list("c1", 0).unwrap().last().unwrap().id;
        let v = store.append("c1", 0, &snap(0), &meta(false)).unwrap();
        assert_eq!(v.sequence, 21);
        assert_eq!(store.count("c1", 0).unwrap(), 21);
        assert!(store.get(oldest).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_tags_is_an_error() {
        let (store, _dir) = test_store();
        let (v, _) = store.create("c1", 0, &snap(1), &meta(false), 20).unwrap();
        {
            let conn = lock(&store.inner).unwrap();
            conn.execute("UPDATE code_versions SET tags = 'not json' WHERE id = ?1", params![v.id])
                .unwrap();
        }
        let err = store.get(v.id).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.list("c1", 0).is_err());
    }
}
