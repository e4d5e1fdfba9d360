// src/store.rs

use crate::analysis::{AnalysisResult, ResultRow, Source};
use crate::error::StoreError;
use crate::invoice::parse_invoice_date;
use rusqlite::{Connection, Result as SqliteResult, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use time::Date;
use time::macros::format_description;
use tracing::info;

/// The accumulated result collection.
///
/// Append-only apart from [`ResultStore::reset`]; rows that are equal in
/// every field are stored once.
pub struct ResultStore {
    conn: Connection,
}

#[derive(Serialize)]
struct ExportRecord<'a> {
    invoice_date: String,
    description: &'a str,
    quantity: f64,
    carbon_kg: f64,
    category: &'a str,
    confidence: f64,
    justification: &'a str,
    source: &'static str,
}

impl ResultStore {
    /// Open (or create) a store backed by a SQLite file
    pub fn open<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    /// A store that lives only as long as this process
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS results (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                row_key TEXT NOT NULL UNIQUE,
                invoice_date TEXT,
                description TEXT NOT NULL,
                quantity REAL NOT NULL,
                carbon_kg REAL NOT NULL,
                category TEXT NOT NULL,
                confidence REAL NOT NULL,
                justification TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_results_source ON results(source)",
            [],
        )?;

        info!("Result store initialized");
        Ok(Self { conn })
    }

    /// Hash of every field of a row; equal rows get equal keys.
    pub fn row_key(row: &ResultRow) -> String {
        let mut hasher = Sha256::new();
        let date = row.invoice_date.map(format_date).unwrap_or_default();
        for text in [
            date.as_str(),
            row.description.as_str(),
            row.category.as_str(),
            row.justification.as_str(),
            row.source.as_str(),
        ] {
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        for number in [row.quantity, row.carbon_kg, row.confidence] {
            hasher.update(number.to_bits().to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Merge a batch, skipping rows already present. Returns how many were new.
    pub fn append_batch(&mut self, rows: &[ResultRow]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO results
                    (row_key, invoice_date, description, quantity, carbon_kg, category, confidence, justification, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for row in rows {
                added += stmt.execute(params![
                    Self::row_key(row),
                    row.invoice_date.map(format_date),
                    row.description,
                    row.quantity,
                    row.carbon_kg,
                    row.category,
                    row.confidence,
                    row.justification,
                    row.source.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        info!(batch = rows.len(), added, "Batch merged into result store");
        Ok(added)
    }

    /// Record a hand-entered row. Corrections are new rows, never edits.
    pub fn add_manual(
        &mut self,
        invoice_date: Option<Date>,
        description: &str,
        quantity: f64,
        factor_per_unit: f64,
        category: Option<&str>,
    ) -> Result<ResultRow, StoreError> {
        if description.trim().is_empty() {
            return Err(StoreError::InvalidEntry("description is empty".to_string()));
        }
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(StoreError::InvalidEntry(format!("invalid quantity {quantity}")));
        }
        if !factor_per_unit.is_finite() || factor_per_unit < 0.0 {
            return Err(StoreError::InvalidEntry(format!("invalid factor {factor_per_unit}")));
        }

        let row = ResultRow::new(
            invoice_date,
            description.trim(),
            quantity,
            AnalysisResult {
                category: category
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or("Manual entry")
                    .to_string(),
                factor_per_unit,
                justification: format!("Manual entry: {factor_per_unit} kgCO2e per unit."),
                confidence: 1.0,
            },
            Source::Manual,
        );
        self.append_batch(std::slice::from_ref(&row))?;
        Ok(row)
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Result<Vec<ResultRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT invoice_date, description, quantity, carbon_kg, category, confidence, justification, source
             FROM results ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |r| {
                let date: Option<String> = r.get(0)?;
                let source: String = r.get(7)?;
                Ok(ResultRow {
                    invoice_date: date.as_deref().and_then(parse_invoice_date),
                    description: r.get(1)?,
                    quantity: r.get(2)?,
                    carbon_kg: r.get(3)?,
                    category: r.get(4)?,
                    confidence: r.get(5)?,
                    justification: r.get(6)?,
                    source: Source::from_tag(&source),
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Remove every accumulated row.
    pub fn reset(&mut self) -> Result<usize, StoreError> {
        let removed = self.conn.execute("DELETE FROM results", [])?;
        info!(removed, "Result store reset");
        Ok(removed)
    }

    /// Write all rows as a flat CSV table. Returns the number of rows written.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<usize, StoreError> {
        let rows = self.rows()?;
        let mut out = csv::Writer::from_writer(writer);
        for row in &rows {
            out.serialize(ExportRecord {
                invoice_date: row.invoice_date.map(format_date).unwrap_or_default(),
                description: &row.description,
                quantity: row.quantity,
                carbon_kg: row.carbon_kg,
                category: &row.category,
                confidence: row.confidence,
                justification: &row.justification,
                source: row.source.as_str(),
            })?;
        }
        if rows.is_empty() {
            out.write_record([
                "invoice_date",
                "description",
                "quantity",
                "carbon_kg",
                "category",
                "confidence",
                "justification",
                "source",
            ])?;
        }
        out.flush()?;
        Ok(rows.len())
    }
}

/// ISO `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    // a Date supplies every component this description names
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}
