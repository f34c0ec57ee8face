//! Persistent store for papers, summaries, and the synthesis record.
//!
//! SQLite via rusqlite. Foreign keys are enforced and the on-disk database
//! runs in WAL mode, mirroring the settings the pipeline has always used.
//! All access goes through a single mutex-guarded connection, so writes to
//! any record are serialized; each operation is a single statement and
//! therefore record-atomic.

use crate::error::StoreError;
use crate::types::{NewPaper, NewSummary, NewSynthesis, Paper, Summary, Synthesis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Counts of stored records, used for progress reporting and the chat
/// preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounts {
    pub papers: usize,
    pub summaries: usize,
    pub syntheses: usize,
}

/// SQLite-backed store. Identifiers are assigned by the store
/// (AUTOINCREMENT) and never reused; upserts update rows in place.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and if needed create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                message: format!("Cannot create database directory: {e}"),
            })?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(unavailable)?;
        Self::init(conn, &path.display().to_string())
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, location: &str) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(unavailable)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS papers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                authors TEXT NOT NULL DEFAULT '',
                abstract TEXT NOT NULL DEFAULT '',
                year INTEGER,
                full_text TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_name TEXT NOT NULL UNIQUE,
                page_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                paper_id INTEGER NOT NULL UNIQUE REFERENCES papers(id) ON DELETE CASCADE,
                overview TEXT NOT NULL,
                key_findings TEXT NOT NULL DEFAULT '',
                methodology TEXT NOT NULL DEFAULT '',
                contributions TEXT NOT NULL DEFAULT '',
                limitations TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS synthesis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                narrative TEXT NOT NULL,
                themes TEXT NOT NULL,
                gaps TEXT NOT NULL,
                directions TEXT NOT NULL,
                papers_included TEXT NOT NULL,
                paper_count INTEGER NOT NULL,
                survey TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(unavailable)?;
        info!(location, "Store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a paper, or overwrite the existing row for the same source
    /// filename (re-runs replace, keeping the original identifier).
    pub fn insert_paper(&self, paper: &NewPaper) -> Result<i64, StoreError> {
        let conn = self.conn();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM papers WHERE file_name = ?1",
                params![paper.file_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE papers SET title = ?1, authors = ?2, abstract = ?3, year = ?4,
                     full_text = ?5, file_path = ?6, page_count = ?7 WHERE id = ?8",
                    params![
                        paper.title,
                        paper.authors,
                        paper.abstract_text,
                        paper.year,
                        paper.full_text,
                        paper.file_path,
                        paper.page_count as i64,
                        id
                    ],
                )
                .map_err(unavailable)?;
                debug!(paper_id = id, file = %paper.file_name, "Overwrote paper for re-run");
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO papers (title, authors, abstract, year, full_text,
                     file_path, file_name, page_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        paper.title,
                        paper.authors,
                        paper.abstract_text,
                        paper.year,
                        paper.full_text,
                        paper.file_path,
                        paper.file_name,
                        paper.page_count as i64,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(unavailable)?;
                conn.last_insert_rowid()
            }
        };
        Ok(id)
    }

    pub fn get_paper(&self, id: i64) -> Result<Paper, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, title, authors, abstract, year, full_text, file_path,
                 file_name, page_count, created_at FROM papers WHERE id = ?1",
                params![id],
                paper_from_row,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::PaperNotFound { id })
    }

    /// All papers ordered by identifier ascending. Empty store yields an
    /// empty list, not an error.
    pub fn list_papers(&self) -> Result<Vec<Paper>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, authors, abstract, year, full_text, file_path,
                 file_name, page_count, created_at FROM papers ORDER BY id ASC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], paper_from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        Ok(rows)
    }

    /// Insert or replace the summary for a paper. At most one summary per
    /// paper; the row is updated in place so summary ids are never reused.
    pub fn upsert_summary(&self, paper_id: i64, summary: &NewSummary) -> Result<i64, StoreError> {
        let conn = self.conn();
        let paper_exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM papers WHERE id = ?1",
                params![paper_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        if paper_exists.is_none() {
            return Err(StoreError::PaperNotFound { id: paper_id });
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM summaries WHERE paper_id = ?1",
                params![paper_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE summaries SET overview = ?1, key_findings = ?2, methodology = ?3,
                     contributions = ?4, limitations = ?5 WHERE id = ?6",
                    params![
                        summary.overview,
                        summary.key_findings,
                        summary.methodology,
                        summary.contributions,
                        summary.limitations,
                        id
                    ],
                )
                .map_err(unavailable)?;
                debug!(paper_id, summary_id = id, "Replaced existing summary");
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO summaries (paper_id, overview, key_findings, methodology,
                     contributions, limitations, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        paper_id,
                        summary.overview,
                        summary.key_findings,
                        summary.methodology,
                        summary.contributions,
                        summary.limitations,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(unavailable)?;
                conn.last_insert_rowid()
            }
        };
        Ok(id)
    }

    pub fn get_summary(&self, paper_id: i64) -> Result<Summary, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, paper_id, overview, key_findings, methodology, contributions,
                 limitations, created_at FROM summaries WHERE paper_id = ?1",
                params![paper_id],
                summary_from_row,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::SummaryNotFound { paper_id })
    }

    /// All summaries ordered by paper identifier ascending.
    pub fn list_summaries(&self) -> Result<Vec<Summary>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, paper_id, overview, key_findings, methodology, contributions,
                 limitations, created_at FROM summaries ORDER BY paper_id ASC",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], summary_from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        Ok(rows)
    }

    /// Insert or replace the synthesis record. At most one exists at a
    /// time; a re-run replaces it in place.
    pub fn upsert_synthesis(&self, synthesis: &NewSynthesis) -> Result<i64, StoreError> {
        let conn = self.conn();
        let themes = serde_json::to_string(&synthesis.themes).unwrap_or_default();
        let gaps = serde_json::to_string(&synthesis.gaps).unwrap_or_default();
        let directions = serde_json::to_string(&synthesis.directions).unwrap_or_default();
        let included = serde_json::to_string(&synthesis.papers_included).unwrap_or_default();

        let existing: Option<i64> = conn
            .query_row("SELECT id FROM synthesis LIMIT 1", [], |row| row.get(0))
            .optional()
            .map_err(unavailable)?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE synthesis SET narrative = ?1, themes = ?2, gaps = ?3,
                     directions = ?4, papers_included = ?5, paper_count = ?6,
                     survey = ?7, created_at = ?8 WHERE id = ?9",
                    params![
                        synthesis.narrative,
                        themes,
                        gaps,
                        directions,
                        included,
                        synthesis.papers_included.len() as i64,
                        synthesis.survey,
                        Utc::now().to_rfc3339(),
                        id
                    ],
                )
                .map_err(unavailable)?;
                debug!(synthesis_id = id, "Replaced existing synthesis");
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO synthesis (narrative, themes, gaps, directions,
                     papers_included, paper_count, survey, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        synthesis.narrative,
                        themes,
                        gaps,
                        directions,
                        included,
                        synthesis.papers_included.len() as i64,
                        synthesis.survey,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(unavailable)?;
                conn.last_insert_rowid()
            }
        };
        Ok(id)
    }

    pub fn get_synthesis(&self) -> Result<Synthesis, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, narrative, themes, gaps, directions, papers_included,
                 paper_count, survey, created_at FROM synthesis LIMIT 1",
                [],
                synthesis_from_row,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::SynthesisNotFound)
    }

    /// Record counts across all three tables.
    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.conn();
        let count = |table: &str| -> Result<usize, StoreError> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(unavailable)
        };
        Ok(StoreCounts {
            papers: count("papers")?,
            summaries: count("summaries")?,
            syntheses: count("synthesis")?,
        })
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable {
        message: err.to_string(),
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_json_list<T: serde::de::DeserializeOwned + Default>(raw: String) -> T {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn paper_from_row(row: &Row<'_>) -> rusqlite::Result<Paper> {
    Ok(Paper {
        id: row.get(0)?,
        title: row.get(1)?,
        authors: row.get(2)?,
        abstract_text: row.get(3)?,
        year: row.get(4)?,
        full_text: row.get(5)?,
        file_path: row.get(6)?,
        file_name: row.get(7)?,
        page_count: row.get::<_, i64>(8)? as usize,
        created_at: parse_timestamp(row.get(9)?),
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: row.get(0)?,
        paper_id: row.get(1)?,
        overview: row.get(2)?,
        key_findings: row.get(3)?,
        methodology: row.get(4)?,
        contributions: row.get(5)?,
        limitations: row.get(6)?,
        created_at: parse_timestamp(row.get(7)?),
    })
}

fn synthesis_from_row(row: &Row<'_>) -> rusqlite::Result<Synthesis> {
    Ok(Synthesis {
        id: row.get(0)?,
        narrative: row.get(1)?,
        themes: parse_json_list(row.get(2)?),
        gaps: parse_json_list(row.get(3)?),
        directions: parse_json_list(row.get(4)?),
        papers_included: parse_json_list(row.get(5)?),
        paper_count: row.get::<_, i64>(6)? as usize,
        survey: row.get(7)?,
        created_at: parse_timestamp(row.get(8)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_paper(file_name: &str) -> NewPaper {
        NewPaper {
            title: format!("Paper from {file_name}"),
            authors: "Ada Lovelace, Alan Turing".into(),
            abstract_text: "We study things.".into(),
            year: Some(2024),
            full_text: "Full text of the paper.".into(),
            file_path: format!("/papers/{file_name}"),
            file_name: file_name.into(),
            page_count: 12,
        }
    }

    fn sample_summary() -> NewSummary {
        NewSummary {
            overview: "A short overview.".into(),
            key_findings: "- finding".into(),
            methodology: "Experiments.".into(),
            contributions: "A new method.".into(),
            limitations: "Small sample.".into(),
        }
    }

    #[test]
    fn insert_and_get_paper() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_paper(&sample_paper("a.pdf")).unwrap();
        let paper = store.get_paper(id).unwrap();
        assert_eq!(paper.id, id);
        assert_eq!(paper.title, "Paper from a.pdf");
        assert_eq!(paper.year, Some(2024));
        assert_eq!(paper.page_count, 12);
    }

    #[test]
    fn get_missing_paper_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_paper(99),
            Err(StoreError::PaperNotFound { id: 99 })
        ));
    }

    #[test]
    fn empty_list_is_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_papers().unwrap().is_empty());
        assert!(store.list_summaries().unwrap().is_empty());
    }

    #[test]
    fn reinserting_same_file_name_overwrites_keeping_id() {
        let store = Store::open_in_memory().unwrap();
        let id = store.insert_paper(&sample_paper("a.pdf")).unwrap();
        let mut rerun = sample_paper("a.pdf");
        rerun.title = "Revised title".into();
        let id2 = store.insert_paper(&rerun).unwrap();
        assert_eq!(id, id2);
        assert_eq!(store.list_papers().unwrap().len(), 1);
        assert_eq!(store.get_paper(id).unwrap().title, "Revised title");
    }

    #[test]
    fn upsert_summary_requires_existing_paper() {
        let store = Store::open_in_memory().unwrap();
        let result = store.upsert_summary(7, &sample_summary());
        assert!(matches!(result, Err(StoreError::PaperNotFound { id: 7 })));
    }

    #[test]
    fn upsert_summary_replaces_not_duplicates() {
        let store = Store::open_in_memory().unwrap();
        let paper_id = store.insert_paper(&sample_paper("a.pdf")).unwrap();

        let first_id = store.upsert_summary(paper_id, &sample_summary()).unwrap();
        let mut second = sample_summary();
        second.overview = "A replaced overview.".into();
        let second_id = store.upsert_summary(paper_id, &second).unwrap();

        assert_eq!(first_id, second_id);
        let summaries = store.list_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].overview, "A replaced overview.");
    }

    #[test]
    fn synthesis_is_a_singleton() {
        let store = Store::open_in_memory().unwrap();
        let make = |narrative: &str| NewSynthesis {
            narrative: narrative.into(),
            themes: vec!["theme".into()],
            gaps: vec!["gap".into()],
            directions: vec!["direction".into()],
            papers_included: vec![1, 2],
            survey: "## Survey".into(),
        };
        assert!(matches!(
            store.get_synthesis(),
            Err(StoreError::SynthesisNotFound)
        ));
        let id = store.upsert_synthesis(&make("first")).unwrap();
        let id2 = store.upsert_synthesis(&make("second")).unwrap();
        assert_eq!(id, id2);
        let synthesis = store.get_synthesis().unwrap();
        assert_eq!(synthesis.narrative, "second");
        assert_eq!(synthesis.paper_count, 2);
        assert_eq!(synthesis.papers_included, vec![1, 2]);
        assert_eq!(store.counts().unwrap().syntheses, 1);
    }

    #[test]
    fn counts_reflect_contents() {
        let store = Store::open_in_memory().unwrap();
        let p1 = store.insert_paper(&sample_paper("a.pdf")).unwrap();
        store.insert_paper(&sample_paper("b.pdf")).unwrap();
        store.upsert_summary(p1, &sample_summary()).unwrap();
        let counts = store.counts().unwrap();
        assert_eq!(counts.papers, 2);
        assert_eq!(counts.summaries, 1);
        assert_eq!(counts.syntheses, 0);
    }

    #[test]
    fn on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("research.db");
        let id = {
            let store = Store::open(&path).unwrap();
            store.insert_paper(&sample_paper("a.pdf")).unwrap()
        };
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get_paper(id).unwrap().file_name, "a.pdf");
    }
}
