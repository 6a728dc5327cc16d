//! Persistent asset ledger (SQLite via sqlx).
//!
//! Maps `(source, identifier)` to the file names that asset produced, so a
//! rerun on a persistent volume can prove an asset present from the target
//! tree alone, with no registry call. Lives at `<root>/.phoenix/assets.db`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::asset::{AssetSource, AssetSpec, FetchResult, FetchStatus};

/// File name of the ledger inside the state directory.
pub const LEDGER_FILE: &str = "assets.db";

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub source: AssetSource,
    pub identifier: String,
    pub files: Vec<String>,
    pub category_hint: Option<String>,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct AssetLedger {
    pool: Pool<Sqlite>,
}

impl AssetLedger {
    /// Open (or create) the ledger at `path`. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let ledger = AssetLedger { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// In-memory ledger (no disk I/O).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let ledger = AssetLedger { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                source TEXT NOT NULL,
                identifier TEXT NOT NULL,
                filenames_json TEXT NOT NULL,
                category_hint TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (source, identifier)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// File names recorded for `spec`, if any.
    pub async fn known_files(&self, spec: &AssetSpec) -> Result<Option<Vec<String>>> {
        Ok(self
            .get(spec.source, &spec.identifier)
            .await?
            .map(|e| e.files))
    }

    pub async fn get(&self, source: AssetSource, identifier: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT source, identifier, filenames_json, category_hint, updated_at
            FROM assets
            WHERE source = ?1 AND identifier = ?2
            "#,
        )
        .bind(source.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let files_json: String = row.get("filenames_json");
        Ok(Some(LedgerEntry {
            source,
            identifier: row.get("identifier"),
            files: serde_json::from_str(&files_json)?,
            category_hint: row.get("category_hint"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Upsert the files an asset produced.
    pub async fn record(&self, spec: &AssetSpec, files: &[String]) -> Result<()> {
        let files_json = serde_json::to_string(files)?;
        sqlx::query(
            r#"
            INSERT INTO assets (source, identifier, filenames_json, category_hint, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(source, identifier) DO UPDATE SET
                filenames_json = excluded.filenames_json,
                category_hint = excluded.category_hint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(spec.source.as_str())
        .bind(&spec.identifier)
        .bind(files_json)
        .bind(spec.category_hint.map(|c| c.dir_name()))
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful or skipped fetch that names its files. Others are ignored.
    pub async fn record_result(&self, result: &FetchResult) -> Result<bool> {
        let worth_recording = matches!(result.status, FetchStatus::Success | FetchStatus::Skipped(_))
            && !result.files.is_empty();
        if !worth_recording {
            return Ok(false);
        }
        self.record(&result.asset, &result.files).await?;
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT source, identifier, filenames_json, category_hint, updated_at
            FROM assets
            ORDER BY source, identifier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let source: String = row.get("source");
            let Some(source) = AssetSource::parse(&source) else {
                continue;
            };
            let files_json: String = row.get("filenames_json");
            out.push(LedgerEntry {
                source,
                identifier: row.get("identifier"),
                files: serde_json::from_str(&files_json)?,
                category_hint: row.get("category_hint"),
                updated_at: row.get("updated_at"),
            });
        }
        Ok(out)
    }
}
