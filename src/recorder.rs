use anyhow::Result;
use rusqlite::{params, Connection};
use serde_json::json;

pub use crate::environment::PostRunHook;
use crate::environment::RunRecord;
use crate::logging::{log, obj, v_num, Domain, Level};

/// Logs pass statistics at INFO.
#[derive(Debug, Default)]
pub struct SummaryHook {
    passes: u64,
}

impl SummaryHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl PostRunHook for SummaryHook {
    fn name(&self) -> &str {
        "summary"
    }

    fn on_run_complete(&mut self, record: &RunRecord) -> Result<()> {
        self.passes += 1;
        let (up, down, hold) = record.intent_counts();
        log(
            Level::Info,
            Domain::Env,
            "run_summary",
            obj(&[
                ("pass", json!(record.pass)),
                ("ticks", json!(record.samples.len())),
                ("deadzone", v_num(record.deadzone)),
                ("mean_abs_error", v_num(record.mean_abs_error())),
                ("in_deadzone_ratio", v_num(record.hold_ratio())),
                ("up", json!(up)),
                ("down", json!(down)),
                ("hold", json!(hold)),
                ("dropped", json!(record.dropped())),
            ]),
        );
        Ok(())
    }
}

/// Persists every sample of every pass.
pub struct SqliteRecorder {
    conn: Connection,
    run_id: String,
}

impl SqliteRecorder {
    pub fn new(path: &str, run_id: &str) -> Result<Self> {
        let mut rec = Self {
            conn: Connection::open(path)?,
            run_id: run_id.to_string(),
        };
        rec.init()?;
        Ok(rec)
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS samples (
                run_id TEXT NOT NULL,
                pass INTEGER NOT NULL,
                idx INTEGER NOT NULL,
                ts INTEGER,
                actual REAL NOT NULL,
                predicted REAL NOT NULL,
                intent TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn persist(&mut self, record: &RunRecord) -> Result<()> {
        let tx = self.conn.transaction()?;
        for s in &record.samples {
            tx.execute(
                "INSERT INTO samples (run_id, pass, idx, ts, actual, predicted, intent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.run_id,
                    record.pass as i64,
                    s.index as i64,
                    s.ts,
                    s.actual,
                    s.predicted,
                    s.intent.name()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count(&self, pass: u64) -> Result<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM samples WHERE run_id = ?1 AND pass = ?2",
            params![self.run_id, pass as i64],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

impl PostRunHook for SqliteRecorder {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn on_run_complete(&mut self, record: &RunRecord) -> Result<()> {
        self.persist(record)
    }
}
