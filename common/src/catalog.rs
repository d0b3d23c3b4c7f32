use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::frame::VideoInfo;
use crate::segment::SegmentMetadata;

pub const CATALOG_FILE: &str = "catalog.db";

/// SQLite catalog of processed videos and their emitted segments.
///
/// One file: `{db_dir}/catalog.db`. The filesystem artifacts stay authoritative;
/// the catalog is a queryable index over them, read by the API server.
///
/// Runs in WAL mode: the API server reads while extractor workers write.
pub struct CatalogDb {
    conn: Mutex<Connection>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to create catalog directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Processing,
    Complete,
    Failed,
    Cancelled,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Processing => "processing",
            VideoStatus::Complete => "complete",
            VideoStatus::Failed => "failed",
            VideoStatus::Cancelled => "cancelled",
        }
    }
}

impl CatalogDb {
    /// Open (or create) the catalog. Creates `db_dir` if it does not exist.
    pub fn open(db_dir: &Path) -> Result<Self, CatalogError> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| CatalogError::CreateDir(db_dir.to_path_buf(), e))?;

        let db_path = db_dir.join(CATALOG_FILE);
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(&conn)?;

        info!(path = %db_path.display(), "catalog opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Catalog without a backing file, for dry runs and tests.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS videos (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                path             TEXT    NOT NULL UNIQUE,
                output_dir       TEXT    NOT NULL,
                width            INTEGER NOT NULL,
                height           INTEGER NOT NULL,
                fps              REAL    NOT NULL,
                frame_count      INTEGER NOT NULL,
                status           TEXT    NOT NULL
                    CHECK(status IN ('processing','complete','failed','cancelled')),
                frames_read      INTEGER NOT NULL DEFAULT 0,
                segments_emitted INTEGER NOT NULL DEFAULT 0,
                error            TEXT,
                started_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS segments (
                video_id        INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
                sequence        INTEGER NOT NULL,
                name            TEXT    NOT NULL,
                start_frame_idx INTEGER NOT NULL,
                end_frame_idx   INTEGER NOT NULL,
                start_frame_sec REAL    NOT NULL,
                end_frame_sec   REAL    NOT NULL,
                duration        REAL    NOT NULL,
                mean_diff       REAL    NOT NULL,
                PRIMARY KEY (video_id, sequence)
            );
            CREATE INDEX IF NOT EXISTS idx_segments_time
                ON segments(video_id, start_frame_idx);

            PRAGMA foreign_keys = ON;",
        )
    }

    /// Register a video as `processing`, resetting counters and dropping the
    /// segments of any earlier run. Returns the video id.
    pub fn begin_video(&self, info: &VideoInfo, output_dir: &Path) -> Result<i64, CatalogError> {
        let now = chrono::Utc::now().timestamp_millis();
        let path = info.path.display().to_string();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO videos
                (path, output_dir, width, height, fps, frame_count, status, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'processing', ?7, ?7)
             ON CONFLICT(path) DO UPDATE SET
                output_dir = excluded.output_dir,
                width = excluded.width,
                height = excluded.height,
                fps = excluded.fps,
                frame_count = excluded.frame_count,
                status = 'processing',
                frames_read = 0,
                segments_emitted = 0,
                error = NULL,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at",
            params![
                path,
                output_dir.display().to_string(),
                info.width,
                info.height,
                info.fps,
                info.frame_count as i64,
                now,
            ],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM videos WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        let stale = tx.execute("DELETE FROM segments WHERE video_id = ?1", params![id])?;
        tx.commit()?;
        debug!(id, path, stale, "video registered in catalog");
        Ok(id)
    }

    /// Insert or replace the row for `(video_id, sequence)`.
    pub fn upsert_segment(
        &self,
        video_id: i64,
        sequence: u64,
        meta: &SegmentMetadata,
    ) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO segments
                (video_id, sequence, name, start_frame_idx, end_frame_idx,
                 start_frame_sec, end_frame_sec, duration, mean_diff)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(video_id, sequence) DO UPDATE SET
                name = excluded.name,
                start_frame_idx = excluded.start_frame_idx,
                end_frame_idx = excluded.end_frame_idx,
                start_frame_sec = excluded.start_frame_sec,
                end_frame_sec = excluded.end_frame_sec,
                duration = excluded.duration,
                mean_diff = excluded.mean_diff",
            params![
                video_id,
                sequence as i64,
                meta.name,
                meta.start_frame_idx as i64,
                meta.end_frame_idx as i64,
                meta.start_frame_sec,
                meta.end_frame_sec,
                meta.duration,
                meta.mean_diff,
            ],
        )?;
        conn.execute(
            "UPDATE videos SET
                segments_emitted = (SELECT COUNT(*) FROM segments WHERE video_id = ?1),
                updated_at = ?2
             WHERE id = ?1",
            params![video_id, chrono::Utc::now().timestamp_millis()],
        )?;
        debug!(video_id, sequence, name = meta.name, "segment upserted");
        Ok(())
    }

    /// Record the final state of a video run.
    pub fn finish_video(
        &self,
        video_id: i64,
        status: VideoStatus,
        frames_read: u64,
        error: Option<&str>,
    ) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE videos SET status = ?1, frames_read = ?2, error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                status.as_str(),
                frames_read as i64,
                error,
                chrono::Utc::now().timestamp_millis(),
                video_id,
            ],
        )?;
        debug!(video_id, status = status.as_str(), frames_read, "video finished in catalog");
        Ok(())
    }

    pub fn list_videos(&self) -> Result<Vec<VideoRow>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, path, output_dir, width, height, fps, frame_count, status,
                    frames_read, segments_emitted, error, started_at, updated_at
             FROM videos ORDER BY path ASC",
        )?;
        let rows = stmt.query_map([], VideoRow::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn get_video(&self, video_id: i64) -> Result<Option<VideoRow>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, path, output_dir, width, height, fps, frame_count, status,
                        frames_read, segments_emitted, error, started_at, updated_at
                 FROM videos WHERE id = ?1",
                params![video_id],
                VideoRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_segments(&self, video_id: i64) -> Result<Vec<SegmentRow>, CatalogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT video_id, sequence, name, start_frame_idx, end_frame_idx,
                    start_frame_sec, end_frame_sec, duration, mean_diff
             FROM segments WHERE video_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![video_id], SegmentRow::from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

// ── Data types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRow {
    pub id: i64,
    pub path: String,
    pub output_dir: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: i64,
    pub status: String,
    pub frames_read: i64,
    pub segments_emitted: i64,
    pub error: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
}

impl VideoRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            output_dir: row.get(2)?,
            width: row.get(3)?,
            height: row.get(4)?,
            fps: row.get(5)?,
            frame_count: row.get(6)?,
            status: row.get(7)?,
            frames_read: row.get(8)?,
            segments_emitted: row.get(9)?,
            error: row.get(10)?,
            started_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRow {
    pub video_id: i64,
    pub sequence: i64,
    pub name: String,
    pub start_frame_idx: i64,
    pub end_frame_idx: i64,
    pub start_frame_sec: f64,
    pub end_frame_sec: f64,
    pub duration: f64,
    pub mean_diff: f64,
}

impl SegmentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            video_id: row.get(0)?,
            sequence: row.get(1)?,
            name: row.get(2)?,
            start_frame_idx: row.get(3)?,
            end_frame_idx: row.get(4)?,
            start_frame_sec: row.get(5)?,
            end_frame_sec: row.get(6)?,
            duration: row.get(7)?,
            mean_diff: row.get(8)?,
        })
    }
}
