use chrono::{DateTime, Utc};
use factorlab_core::{Error, ExecutionResult, Fixture, Result, Variant};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::db::{from_json, lock, open_connection, parse_ts, storage_err, SharedConnection};

/// Per-comment container of variants, the user overlay, and cached results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationRecord {
    pub id: i64,
    pub comment_id: String,
    /// Text the variants were generated from.
    pub source_text: String,
    pub variants: Vec<Variant>,
    pub user_modified_variants: Option<Vec<Variant>>,
    pub default_fixture: Fixture,
    pub last_fixture: Option<Fixture>,
    pub execution_results: BTreeMap<usize, ExecutionResult>,
    pub last_executed_variant: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExplorationRecord {
    /// The authoritative variant list: the overlay when present, else the AI output.
    pub fn live_variants(&self) -> &[Variant] {
        match &self.user_modified_variants {
            Some(overlay) => overlay,
            None => &self.variants,
        }
    }

    pub fn live_variant(&self, index: usize) -> Option<&Variant> {
        self.live_variants().get(index)
    }

    pub fn is_modified(&self) -> bool {
        self.user_modified_variants.is_some()
    }

    /// Fixture a UI should preselect.
    pub fn effective_fixture(&self) -> Fixture {
        self.last_fixture.clone().unwrap_or_else(|| self.default_fixture.clone())
    }

    /// Live variants with `variant` put at `index`.
    pub fn with_live_variant(&self, index: usize, variant: Variant) -> Result<Vec<Variant>> {
        let mut live = self.live_variants().to_vec();
        let slot = live.get_mut(index).ok_or_else(|| {
            Error::Validation(format!(
                "variant index {} out of range (record has {})",
                index,
                self.variants.len()
            ))
        })?;
        *slot = variant;
        Ok(live)
    }
}

pub struct ExplorationStore {
    inner: SharedConnection,
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExplorationRecord> {
    let variants: String = row.get("variants")?;
    let overlay: Option<String> = row.get("user_modified_variants")?;
    let results: String = row.get("execution_results")?;
    let last_code: Option<String> = row.get("last_code")?;
    let last_date: Option<i64> = row.get("last_date")?;
    let last_executed: Option<i64> = row.get("last_executed_variant")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ExplorationRecord {
        id: row.get("id")?,
        comment_id: row.get("comment_id")?,
        source_text: row.get("source_text")?,
        variants: from_json(&variants, 3)?,
        user_modified_variants: overlay.as_deref().map(|o| from_json(o, 4)).transpose()?,
        default_fixture: Fixture::new(row.get::<_, String>("default_code")?, row.get("default_date")?),
        last_fixture: match (last_code, last_date) {
            (Some(code), Some(date)) => Some(Fixture::new(code, date)),
            _ => None,
        },
        execution_results: from_json(&results, 9)?,
        last_executed_variant: last_executed.map(|v| v as usize),
        created_at: parse_ts(&created_at, 11)?,
        updated_at: parse_ts(&updated_at, 12)?,
    })
}

impl ExplorationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = Self {
            inner: open_connection(db_path, "exploration")?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = lock(&self.inner)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS comment_explorations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                comment_id TEXT NOT NULL UNIQUE,
                source_text TEXT NOT NULL DEFAULT '',
                variants TEXT NOT NULL,
                user_modified_variants TEXT,
                default_code TEXT NOT NULL,
                default_date INTEGER NOT NULL,
                last_code TEXT,
                last_date INTEGER,
                execution_results TEXT NOT NULL DEFAULT '{}',
                last_executed_variant INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(storage_err("Failed to init exploration schema"))?;
        Ok(())
    }

    pub fn get(&self, comment_id: &str) -> Result<Option<ExplorationRecord>> {
        let conn = lock(&self.inner)?;
        conn.query_row(
            "SELECT * FROM comment_explorations WHERE comment_id = ?1",
            params![comment_id],
            row_to_record,
        )
        .optional()
        .map_err(storage_err("Failed to load exploration"))
    }

    pub fn require(&self, comment_id: &str) -> Result<ExplorationRecord> {
        self.get(comment_id)?
            .ok_or_else(|| Error::NotFound(format!("exploration for comment {}", comment_id)))
    }

    /// Insert a record, or replace the AI variants of an existing one.
    /// Replacing clears the overlay and every cached result.
    pub fn upsert_variants(
        &self,
        comment_id: &str,
        source_text: &str,
        variants: &[Variant],
        default_fixture: &Fixture,
    ) -> Result<ExplorationRecord> {
        let now = Utc::now().to_rfc3339();
        let variants_json = serde_json::to_string(variants)?;
        {
            let conn = lock(&self.inner)?;
            conn.execute(
                "INSERT INTO comment_explorations
                    (comment_id, source_text, variants, default_code, default_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(comment_id) DO UPDATE SET
                    source_text = excluded.source_text,
                    variants = excluded.variants,
                    user_modified_variants = NULL,
                    execution_results = '{}',
                    last_executed_variant = NULL,
                    updated_at = excluded.updated_at",
                params![comment_id, source_text, variants_json, default_fixture.code, default_fixture.date, now],
            )
            .map_err(storage_err("Failed to store variants"))?;
        }
        info!(comment_id = %comment_id, count = variants.len(), "Stored generated variants");
        self.require(comment_id)
    }

    /// Write the user overlay. The record must exist.
    pub fn save_overlay(&self, comment_id: &str, variants: &[Variant]) -> Result<()> {
        let overlay = serde_json::to_string(variants)?;
        let conn = lock(&self.inner)?;
        let changed = conn
            .execute(
                "UPDATE comment_explorations SET user_modified_variants = ?1, updated_at = ?2 WHERE comment_id = ?3",
                params![overlay, Utc::now().to_rfc3339(), comment_id],
            )
            .map_err(storage_err("Failed to save overlay"))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("exploration for comment {}", comment_id)));
        }
        debug!(comment_id = %comment_id, "Saved variant overlay");
        Ok(())
    }

    /// Replace one live variant (creating the overlay if needed).
    pub fn update_live_variant(&self, comment_id: &str, index: usize, variant: Variant) -> Result<ExplorationRecord> {
        let record = self.require(comment_id)?;
        let live = record.with_live_variant(index, variant)?;
        self.save_overlay(comment_id, &live)?;
        self.require(comment_id)
    }

    /// Cache `result` for `index`, overwriting any previous one. Last writer wins.
    pub fn store_result(&self, comment_id: &str, index: usize, result: &ExecutionResult) -> Result<()> {
        let mut conn = lock(&self.inner)?;
        let tx = conn.transaction().map_err(storage_err("Failed to begin transaction"))?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT execution_results FROM comment_explorations WHERE comment_id = ?1",
                params![comment_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Failed to load cached results"))?;
        let raw = raw.ok_or_else(|| Error::NotFound(format!("exploration for comment {}", comment_id)))?;

        let mut results: BTreeMap<usize, ExecutionResult> = serde_json::from_str(&raw)?;
        results.insert(index, result.clone());

        tx.execute(
            "UPDATE comment_explorations
             SET execution_results = ?1, last_code = ?2, last_date = ?3,
                 last_executed_variant = ?4, updated_at = ?5
             WHERE comment_id = ?6",
            params![
                serde_json::to_string(&results)?,
                result.fixture_used.code,
                result.fixture_used.date,
                index as i64,
                Utc::now().to_rfc3339(),
                comment_id
            ],
        )
        .map_err(storage_err("Failed to cache result"))?;
        tx.commit().map_err(storage_err("Failed to commit result"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorlab_core::FailureKind;
    use tempfile::TempDir;

    fn test_store() -> (ExplorationStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ExplorationStore::open(&dir.path().join("explore.db")).unwrap();
        (store, dir)
    }

    fn variants(tag: &str) -> Vec<Variant> {
        (0..3)
            .map(|i| Variant {
                name: format!("{}-{}", tag, i),
                description: "d".to_string(),
                pseudocode: "p".to_string(),
                code: format!("def calculate_factor(code, date):\n    return {{'v': {}}}, {{}}\n", i),
            })
            .collect()
    }

    #[test]
    fn test_create_and_get() {
        let (store, _dir) = test_store();
        assert!(store.get("c1").unwrap().is_none());
        let rec = store.upsert_variants("c1", "text", &variants("a"), &Fixture::validation()).unwrap();
        assert_eq!(rec.variants.len(), 3);
        assert!(!rec.is_modified());
        assert_eq!(rec.live_variants()[0].name, "a-0");
        assert_eq!(rec.effective_fixture(), Fixture::validation());
    }

    #[test]
    fn test_overlay_is_authoritative() {
        let (store, _dir) = test_store();
        store.upsert_variants("c1", "text", &variants("a"), &Fixture::validation()).unwrap();
        let edited = Variant {
            name: "mine".to_string(),
            ..variants("a")[1].clone()
        };
        let rec = store.update_live_variant("c1", 1, edited).unwrap();
        assert!(rec.is_modified());
        assert_eq!(rec.variants[1].name, "a-1");
        assert_eq!(rec.live_variant(1).unwrap().name, "mine");
        // Second edit builds on the overlay, not on the original
        let rec = store.update_live_variant("c1", 2, variants("b")[2].clone()).unwrap();
        assert_eq!(rec.live_variant(1).unwrap().name, "mine");
        assert_eq!(rec.live_variant(2).unwrap().name, "b-2");
    }

    #[test]
    fn test_out_of_range_index() {
        let (store, _dir) = test_store();
        store.upsert_variants("c1", "text", &variants("a"), &Fixture::validation()).unwrap();
        let err = store.update_live_variant("c1", 7, Variant::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_save_overlay_requires_record() {
        let (store, _dir) = test_store();
        let err = store.save_overlay("missing", &variants("a")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_results_overwrite_and_regenerate_clears() {
        let (store, _dir) = test_store();
        store.upsert_variants("c1", "text", &variants("a"), &Fixture::validation()).unwrap();
        let fixture = Fixture::new("600000", 20230103);
        let first = ExecutionResult::failed(&fixture, FailureKind::Runtime, "boom", None, None);
        store.store_result("c1", 0, &first).unwrap();
        let second = ExecutionResult::succeeded(&fixture, Default::default(), Default::default());
        store.store_result("c1", 0, &second).unwrap();

        let rec = store.require("c1").unwrap();
        assert_eq!(rec.execution_results.len(), 1);
        assert!(rec.execution_results[&0].success);
        assert_eq!(rec.last_executed_variant, Some(0));
        assert_eq!(rec.effective_fixture(), fixture);

        store.update_live_variant("c1", 0, Variant::default()).unwrap();
        let rec = store.upsert_variants("c1", "text2", &variants("z"), &Fixture::validation()).unwrap();
        assert!(rec.execution_results.is_empty());
        assert!(rec.user_modified_variants.is_none());
        assert!(rec.last_executed_variant.is_none());
        assert_eq!(rec.source_text, "text2");
        assert_eq!(rec.live_variants()[0].name, "z-0");
    }
}
