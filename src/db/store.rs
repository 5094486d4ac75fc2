//! SQLite store adapter.
//!
//! Every call opens its own connection and drops it before returning, on the
//! error path as well. Typed work goes through [`Store::run`]; tables whose
//! column set is only known at runtime go through [`Store::upsert`].

use crate::error::{Error, Result};
use crate::frame::{Frame, Value};
use crate::utils::quote_ident;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::query_dsl::LoadQuery;
use diesel::query_builder::SqlQuery;
use diesel::sql_types::{BigInt, Double, Nullable, Text};
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, FileBasedMigrations, MigrationHarness};
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQLite refuses statements with more bound parameters than this.
const MAX_BOUND_PARAMETERS: usize = 32_000;
const BUSY_TIMEOUT_MS: u32 = 30_000;

/// Where the versioned schema comes from.
#[derive(Debug, Clone, Default)]
pub enum SchemaSource {
    /// Migrations compiled into the binary.
    #[default]
    Embedded,
    /// A diesel migrations directory on disk.
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection to an existing store file.
    pub fn connect(&self) -> Result<SqliteConnection> {
        if !self.path.is_file() {
            return Err(Error::StoreConnection {
                path: self.path.clone(),
                message: "store file does not exist; run `database build` first".to_string(),
            });
        }
        Self::establish(&self.path)
    }

    fn establish(path: &Path) -> Result<SqliteConnection> {
        let url = path.to_string_lossy();
        let mut conn = SqliteConnection::establish(&url).map_err(|e| Error::StoreConnection {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            BUSY_TIMEOUT_MS
        ))
        .map_err(|e| Error::StoreConnection {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(conn)
    }

    /// Create the store from `source` when it does not exist yet.
    ///
    /// An existing store is left alone unless `overwrite` (delete and recreate)
    /// or `apply_changes` (apply whatever migrations are still pending) is set.
    /// Returns the versions that were applied.
    pub fn bootstrap(&self, source: &SchemaSource, overwrite: bool, apply_changes: bool) -> Result<Vec<String>> {
        if self.path.is_file() {
            if overwrite {
                info!("Overwriting existing store {}", self.path.display());
                std::fs::remove_file(&self.path)?;
            } else if !apply_changes {
                info!("Store {} already exists; nothing to do", self.path.display());
                return Ok(Vec::new());
            }
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Self::establish(&self.path)?;
        let applied = match source {
            SchemaSource::Embedded => apply_migrations(&mut conn, MIGRATIONS)?,
            SchemaSource::Directory(dir) => {
                let migrations = FileBasedMigrations::from_path(dir)
                    .map_err(|e| Error::Schema(format!("{}: {}", dir.display(), e)))?;
                apply_migrations(&mut conn, migrations)?
            }
        };
        if applied.is_empty() {
            info!("Store schema is up to date; no migrations were applied");
        } else {
            info!("Applied {} migration(s): {}", applied.len(), applied.join(", "));
        }
        Ok(applied)
    }

    /// Typed read of an arbitrary statement.
    pub fn query<T>(&self, sql: &str) -> Result<Vec<T>>
    where
        SqlQuery: LoadQuery<'static, SqliteConnection, T>,
    {
        let mut conn = self.connect()?;
        diesel::sql_query(sql).load::<T>(&mut conn).map_err(|e| Error::query(sql, e))
    }

    pub fn execute(&self, sql: &str) -> Result<usize> {
        let mut conn = self.connect()?;
        diesel::sql_query(sql).execute(&mut conn).map_err(|e| Error::query(sql, e))
    }

    /// Run typed diesel work on a fresh connection; `label` names the work in errors.
    pub fn run<T>(&self, label: &str, f: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>) -> Result<T> {
        let mut conn = self.connect()?;
        f(&mut conn).map_err(|e| Error::query(label, e))
    }

    /// Column names currently present on `table`.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let rows: Vec<crate::db::models::TableColumn> = self.query(&sql)?;
        Ok(rows.into_iter().map(|c| c.name).collect())
    }

    /// Read a wide table into a [`Frame`] without knowing its columns up front.
    ///
    /// `tail` is appended verbatim (`WHERE ...`, `ORDER BY ...`).
    pub fn select_frame(&self, table: &str, tail: &str) -> Result<Frame> {
        let columns = self.table_columns(table)?;
        if columns.is_empty() {
            return Err(Error::query(format!("SELECT * FROM {}", quote_ident(table)), format!("no such table: {}", table)));
        }
        let sql = format!(
            "SELECT json_array({}) AS row_json FROM {} {}",
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            quote_ident(table),
            tail
        );
        let rows: Vec<crate::db::models::JsonRow> = self.query(&sql)?;
        let mut frame = Frame::new(columns);
        for json in rows {
            let cells: Vec<serde_json::Value> = serde_json::from_str(&json.row_json).map_err(|e| Error::query(&sql, e))?;
            frame.rows.push(cells.into_iter().map(Value::from_json).collect());
        }
        Ok(frame)
    }

    /// Add every column of `columns` that `table` does not have yet.
    /// Columns are untyped so SQLite keeps whatever storage class arrives.
    pub fn ensure_columns(&self, table: &str, columns: &[String]) -> Result<Vec<String>> {
        let existing: BTreeSet<String> = self.table_columns(table)?.into_iter().collect();
        if existing.is_empty() {
            return Err(Error::query(
                format!("PRAGMA table_info({})", quote_ident(table)),
                format!("no such table: {}", table),
            ));
        }
        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !existing.contains(c.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            return Ok(missing);
        }

        let mut conn = self.connect()?;
        conn.transaction::<_, Error, _>(|conn| {
            for column in &missing {
                let sql = format!("ALTER TABLE {} ADD COLUMN {}", quote_ident(table), quote_ident(column));
                diesel::sql_query(&sql).execute(conn).map_err(|e| Error::query(&sql, e))?;
            }
            Ok(())
        })?;
        debug!("Added {} column(s) to {}: {}", missing.len(), table, missing.join(", "));
        Ok(missing)
    }

    /// Insert `frame` into `table`.
    ///
    /// With `conflict` set, rows colliding on that key update every other field.
    /// When the key covers every field, or `ignore_on_conflict` is set, colliding
    /// rows are skipped instead. NaN is written as NULL.
    pub fn upsert(&self, table: &str, frame: &Frame, conflict: Option<&[&str]>, ignore_on_conflict: bool) -> Result<usize> {
        if frame.is_empty() {
            return Ok(0);
        }
        if frame.columns.is_empty() {
            return Err(Error::query(format!("INSERT INTO {}", quote_ident(table)), "no fields to insert"));
        }

        let updates: Vec<&String> = frame
            .columns
            .iter()
            .filter(|c| !conflict.is_some_and(|key| key.contains(&c.as_str())))
            .collect();
        let ignore = ignore_on_conflict || (conflict.is_some() && updates.is_empty());

        let head = format!(
            "INSERT {}INTO {} ({}) VALUES ",
            if ignore { "OR IGNORE " } else { "" },
            quote_ident(table),
            frame.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
        );
        let placeholders = format!("({})", vec!["?"; frame.columns.len()].join(", "));
        let tail = match conflict {
            Some(key) if !ignore => format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                key.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                updates
                    .iter()
                    .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        };

        let rows_per_batch = (MAX_BOUND_PARAMETERS / frame.columns.len()).max(1);
        let mut conn = self.connect()?;
        let written = conn.transaction::<_, Error, _>(|conn| {
            let mut written = 0;
            for chunk in frame.rows.chunks(rows_per_batch) {
                let sql = format!("{}{}{}", head, vec![placeholders.as_str(); chunk.len()].join(", "), tail);
                let mut query = diesel::sql_query(sql.as_str()).into_boxed::<Sqlite>();
                for row in chunk {
                    if row.len() != frame.columns.len() {
                        return Err(Error::query(&sql, format!("row has {} values for {} fields", row.len(), frame.columns.len())));
                    }
                    for value in row {
                        query = match value.clone().normalized() {
                            Value::Null => query.bind::<Nullable<Text>, Option<String>>(None),
                            Value::Integer(i) => query.bind::<BigInt, _>(i),
                            Value::Real(f) => query.bind::<Double, _>(f),
                            Value::Text(s) => query.bind::<Text, _>(s),
                        };
                    }
                }
                written += query.execute(conn).map_err(|e| Error::query(&sql, e))?;
            }
            Ok(written)
        })?;
        debug!("Upserted {} of {} row(s) into {}", written, frame.len(), table);
        Ok(written)
    }
}

fn apply_migrations<S>(conn: &mut SqliteConnection, source: S) -> Result<Vec<String>>
where
    S: diesel::migration::MigrationSource<Sqlite>,
{
    conn.run_pending_migrations(source)
        .map(|applied| applied.iter().map(|v| v.to_string()).collect())
        .map_err(|e| Error::Schema(e.to_string()))
}
