// Group persistence using SQLite

use std::path::Path;

use rusqlite::{params, Connection};

use cohort_grouping::sink::{FinalizedGroup, GroupSink};
use cohort_grouping::GroupingError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    saved_at TEXT NOT NULL,
    position INTEGER NOT NULL,      -- 1-based position in the run's group list
    timezone TEXT NOT NULL,         -- majority timezone when saved
    target_size INTEGER NOT NULL,   -- 0 = no target
    properties_json TEXT NOT NULL   -- JSON object
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL REFERENCES groups(id),
    user_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id)
);
"#;

fn sink_err(e: impl std::fmt::Display) -> GroupingError {
    GroupingError::Sink(e.to_string())
}

pub struct SqliteSink {
    conn: Connection,
    saved_at: String,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, GroupingError> {
        let conn = Connection::open(path).map_err(sink_err)?;
        Self::with_connection(conn)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, GroupingError> {
        conn.execute_batch(SCHEMA).map_err(sink_err)?;
        Ok(Self {
            conn,
            saved_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl GroupSink for SqliteSink {
    fn save(&mut self, group: &FinalizedGroup) -> Result<(), GroupingError> {
        let properties = serde_json::to_string(&group.properties).map_err(sink_err)?;

        let tx = self.conn.transaction().map_err(sink_err)?;
        tx.execute(
            "INSERT INTO groups (saved_at, position, timezone, target_size, properties_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.saved_at,
                group.position as i64,
                &group.timezone,
                group.target_size as i64,
                properties,
            ],
        )
        .map_err(sink_err)?;
        let group_id = tx.last_insert_rowid();

        {
            let mut stmt = tx
                .prepare("INSERT INTO group_members (group_id, user_id, position) VALUES (?1, ?2, ?3)")
                .map_err(sink_err)?;
            for (position, user_id) in group.member_ids.iter().enumerate() {
                stmt.execute(params![group_id, user_id, position as i64])
                    .map_err(sink_err)?;
            }
        }

        tx.commit().map_err(sink_err)
    }
}
