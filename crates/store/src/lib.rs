use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::{params, Connection};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sheetqc_core::{legacy_fatal, Category, CatalogSource, QcError, Subcategory};

/// How far a persisted-fingerprint lookup reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "scope")]
pub enum FingerprintScope {
    /// Every fingerprint ever stored.
    Global,
    /// Fingerprints stored for one project/task pair.
    Task { project_id: i64, task_id: i64 },
}

/// SQLite-backed set of previously seen record fingerprints. The engine
/// only ever reads a snapshot of this set; writes happen after a batch has
/// been classified and accepted.
#[derive(Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS batch_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                task_id INTEGER NOT NULL,
                row_number INTEGER NOT NULL,
                hash_value TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_batch_records_hash ON batch_records(hash_value);
            CREATE INDEX IF NOT EXISTS idx_batch_records_scope
                ON batch_records(project_id, task_id, hash_value);
            "#,
        )?;
        Ok(())
    }

    /// Loads the fingerprint snapshot the classifier runs against.
    pub fn load(&self, scope: FingerprintScope) -> Result<FxHashSet<String>> {
        let conn = self.connection()?;
        let mut set = FxHashSet::default();
        match scope {
            FingerprintScope::Global => {
                let mut stmt = conn.prepare("SELECT DISTINCT hash_value FROM batch_records")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    set.insert(row.get(0)?);
                }
            }
            FingerprintScope::Task {
                project_id,
                task_id,
            } => {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT hash_value FROM batch_records WHERE project_id = ?1 AND task_id = ?2",
                )?;
                let mut rows = stmt.query(params![project_id, task_id])?;
                while let Some(row) = rows.next()? {
                    set.insert(row.get(0)?);
                }
            }
        }
        debug!(count = set.len(), "loaded persisted fingerprints");
        Ok(set)
    }

    /// Persists accepted rows in one transaction.
    pub fn insert_batch(
        &self,
        project_id: i64,
        task_id: i64,
        rows: &[(usize, String)],
    ) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for (row_number, hash) in rows {
            tx.execute(
                "INSERT INTO batch_records (project_id, task_id, row_number, hash_value) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, task_id, *row_number as i64, hash],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

/// SQLite-backed category/subcategory catalog. Rows written before the
/// explicit fatal flag existed carry NULL there and fall back to the legacy
/// name-based detection at load time.
#[derive(Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS categories (
                category_id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_type_id INTEGER NOT NULL,
                category_name TEXT NOT NULL,
                category_points REAL NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS subcategories (
                subcategory_id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL,
                subcategory_name TEXT NOT NULL,
                point_value REAL NOT NULL,
                is_fatal INTEGER,
                sort_order INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(category_id) REFERENCES categories(category_id)
            );
            CREATE INDEX IF NOT EXISTS idx_categories_project_type
                ON categories(project_type_id);
            CREATE INDEX IF NOT EXISTS idx_subcategories_category
                ON subcategories(category_id);
            "#,
        )?;
        Ok(())
    }

    pub fn add_category(
        &self,
        project_type_id: i64,
        name: &str,
        total_points: f64,
        sort_order: i64,
    ) -> Result<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO categories (project_type_id, category_name, category_points, sort_order) VALUES (?1, ?2, ?3, ?4)",
            params![project_type_id, name, total_points, sort_order],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `is_fatal = None` stores a legacy row; fatal detection for it falls
    /// back to the name/weight convention on load.
    pub fn add_subcategory(
        &self,
        category_id: i64,
        name: &str,
        point_value: f64,
        is_fatal: Option<bool>,
        sort_order: i64,
    ) -> Result<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO subcategories (category_id, subcategory_name, point_value, is_fatal, sort_order) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![category_id, name, point_value, is_fatal, sort_order],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_categories(&self, project_type_id: i64) -> Result<Vec<Category>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT category_id, category_name, category_points FROM categories WHERE project_type_id = ?1 ORDER BY sort_order, category_id",
        )?;
        let mut categories = Vec::new();
        let mut rows = stmt.query(params![project_type_id])?;
        while let Some(row) = rows.next()? {
            categories.push(Category {
                category_id: row.get(0)?,
                name: row.get(1)?,
                total_points: row.get(2)?,
                subcategories: Vec::new(),
            });
        }

        let mut sub_stmt = conn.prepare(
            "SELECT subcategory_id, subcategory_name, point_value, is_fatal FROM subcategories WHERE category_id = ?1 ORDER BY sort_order, subcategory_id",
        )?;
        for category in &mut categories {
            let mut rows = sub_stmt.query(params![category.category_id])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                let point_value: f64 = row.get(2)?;
                let stored_flag: Option<bool> = row.get(3)?;
                let is_fatal = stored_flag.unwrap_or_else(|| legacy_fatal(&name, point_value));
                category.subcategories.push(Subcategory {
                    subcategory_id: row.get(0)?,
                    name,
                    point_value,
                    is_fatal,
                });
            }
        }
        Ok(categories)
    }
}

impl CatalogSource for CatalogStore {
    fn categories_for(&self, project_type_id: i64) -> sheetqc_core::Result<Vec<Category>> {
        let categories = self
            .load_categories(project_type_id)
            .map_err(|e| QcError::CatalogUnavailable(e.to_string()))?;
        if categories.is_empty() {
            return Err(QcError::UnknownProjectType(project_type_id));
        }
        Ok(categories)
    }
}
