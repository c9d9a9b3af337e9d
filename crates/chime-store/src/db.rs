use rusqlite::Connection;

use crate::error::Result;

/// Initialise the schedule schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
/// Timestamps are stored as unix seconds (INTEGER) so the due scan is a
/// plain numeric range predicate.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id           TEXT    NOT NULL PRIMARY KEY,
            due_at       INTEGER NOT NULL,    -- unix seconds
            url          TEXT    NOT NULL,
            method       TEXT    NOT NULL,
            headers      TEXT,                -- JSON object or NULL
            body         TEXT,
            status       TEXT    NOT NULL DEFAULT 'IDLE',
            result       TEXT,                -- JSON callback summary or NULL
            started_at   INTEGER,
            completed_at INTEGER,
            canceled_at  INTEGER,
            created_at   INTEGER NOT NULL
        ) STRICT;

        -- The collector's scan: WHERE status = 'IDLE' AND due_at <= ?
        -- ORDER BY due_at, id. Promoted and terminal records fall out of the
        -- index range, so finished work is never rescanned.
        CREATE INDEX IF NOT EXISTS idx_schedules_status_due_at
            ON schedules (status, due_at, id);
        ",
    )?;
    Ok(())
}
