use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use std::path::Path;

use crate::models::{Quality, ReviewDetails, ReviewHistoryEntry, ReviewRecord};
use crate::scheduler::ReviewStore;

pub struct Database {
    conn: Connection,
}

fn encode(record: &ReviewRecord) -> Result<String> {
    serde_json::to_string(record).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode(column: usize, text: &str) -> Result<ReviewRecord> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

// "opening:line" keys; anything without a colon is stored whole as the line
fn split_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or(("", key))
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS review_records (
                key TEXT PRIMARY KEY,
                opening_id TEXT NOT NULL,
                line_id TEXT NOT NULL,
                record TEXT NOT NULL,
                due_date TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS review_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                quality TEXT NOT NULL,
                mistakes INTEGER NOT NULL DEFAULT 0,
                reviewed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_opening ON review_records(opening_id);
            CREATE INDEX IF NOT EXISTS idx_records_due ON review_records(due_date);
            CREATE INDEX IF NOT EXISTS idx_history_key ON review_history(key);
            "#,
        )?;

        Ok(())
    }

    // Review record operations
    pub fn get_record(&self, key: &str) -> Result<Option<ReviewRecord>> {
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM review_records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        text.map(|t| decode(0, &t)).transpose()
    }

    pub fn save_record(&self, key: &str, record: &ReviewRecord) -> Result<()> {
        let (opening_id, line_id) = split_key(key);
        self.conn.execute(
            r#"
            INSERT INTO review_records (key, opening_id, line_id, record, due_date, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(key) DO UPDATE SET
                record = excluded.record,
                due_date = excluded.due_date,
                updated_at = excluded.updated_at
            "#,
            params![
                key,
                opening_id,
                line_id,
                encode(record)?,
                record.due.map(|d| d.to_string()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn delete_record(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM review_records WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    // History operations
    pub fn add_history(&self, key: &str, quality: Quality, mistakes: u32) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO review_history (key, quality, mistakes, reviewed_at) VALUES (?1, ?2, ?3, ?4)",
            params![key, quality.as_str(), mistakes, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_history(&self, key: &str) -> Result<Vec<ReviewHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, key, quality, mistakes, reviewed_at FROM review_history WHERE key = ?1 ORDER BY id DESC",
        )?;
        let entries = stmt
            .query_map(params![key], |row| {
                let quality: String = row.get(2)?;
                let reviewed_at: String = row.get(4)?;
                Ok(ReviewHistoryEntry {
                    id: row.get(0)?,
                    key: row.get(1)?,
                    quality: Quality::from_str(&quality).unwrap_or(Quality::Fail),
                    mistakes: row.get(3)?,
                    reviewed_at: DateTime::parse_from_rfc3339(&reviewed_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn get_stats(&self, today: NaiveDate) -> Result<Stats> {
        let tracked_lines: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM review_records", [], |row| row.get(0))?;

        let total_reviews: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM review_history", [], |row| row.get(0))?;

        let due_today: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM review_records WHERE due_date IS NULL OR due_date <= ?1",
            params![today.to_string()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare("SELECT record FROM review_records")?;
        let records = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?
            .iter()
            .map(|text| decode(0, text))
            .collect::<Result<Vec<_>>>()?;

        let perfect_runs = records.iter().map(|r| i64::from(r.stats.perfect)).sum();
        let avg_ease = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.ease).sum::<f64>() / records.len() as f64
        };

        Ok(Stats {
            tracked_lines,
            total_reviews,
            due_today,
            perfect_runs,
            avg_ease,
        })
    }
}

impl ReviewStore for Database {
    fn load(&self, key: &str) -> crate::error::Result<Option<ReviewRecord>> {
        Ok(self.get_record(key)?)
    }

    fn save(&self, key: &str, record: &ReviewRecord) -> crate::error::Result<()> {
        Ok(self.save_record(key, record)?)
    }

    fn log_review(&self, key: &str, quality: Quality, details: &ReviewDetails) -> crate::error::Result<()> {
        self.add_history(key, quality, details.mistake_count)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub tracked_lines: i64,
    pub total_reviews: i64,
    pub due_today: i64,
    pub perfect_runs: i64,
    pub avg_ease: f64,
}
