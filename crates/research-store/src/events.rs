use chrono::{DateTime, Utc};
use research_types::{EventCursor, NewRunEvent, Result, RunEvent};
use rusqlite::{params, Row};

use crate::ResearchStore;

const EVENT_COLUMNS: &str = "id, session_id, task_id, event_type, query_group, query_text, url, \
     title, snippet, quality_score, phase, severity, payload_json, created_at_micros";

const MIN_PAGE_SIZE: i64 = 1;
const MAX_PAGE_SIZE: i64 = 500;

pub(crate) fn event_from_row(row: &Row) -> rusqlite::Result<RunEvent> {
    let payload: Option<String> = row.get("payload_json")?;
    let micros: i64 = row.get("created_at_micros")?;
    Ok(RunEvent {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        task_id: row.get("task_id")?,
        event_type: row.get("event_type")?,
        query_group: row.get("query_group")?,
        query_text: row.get("query_text")?,
        url: row.get("url")?,
        title: row.get("title")?,
        snippet: row.get("snippet")?,
        quality_score: row.get("quality_score")?,
        phase: row.get("phase")?,
        severity: row.get("severity")?,
        payload_json: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: micros_to_datetime(micros),
    })
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}

fn datetime_to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

impl ResearchStore {
    /// Append an event to the run log. The log is append-only: nothing ever
    /// updates or deletes a row here, which is what makes `events_after`
    /// pagination stable under concurrent writers.
    pub async fn add_event(&self, session_id: i64, event: NewRunEvent) -> Result<i64> {
        let conn = self.conn.lock().await;
        let payload = event
            .payload_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(anyhow::Error::from)?;
        conn.execute(
            "INSERT INTO run_events (session_id, task_id, event_type, query_group, query_text, url, \
             title, snippet, quality_score, phase, severity, payload_json, created_at_micros) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session_id,
                event.task_id,
                event.event_type,
                event.query_group,
                event.query_text,
                event.url,
                event.title,
                event.snippet,
                event.quality_score,
                event.phase,
                event.severity,
                payload,
                datetime_to_micros(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Keyset-paginated read of the run-event log for a session. `limit` is
    /// clamped to `[1, 500]`; a cursor that fails to decode (or that never
    /// matches a real position) is treated as "start from the beginning"
    /// rather than an error, so a client with a stale cursor just replays
    /// from scratch instead of getting stuck.
    pub async fn events_after(
        &self,
        session_id: i64,
        cursor: Option<EventCursor>,
        limit: i64,
    ) -> Result<(Vec<RunEvent>, Option<EventCursor>)> {
        let limit = limit.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        let conn = self.conn.lock().await;

        let rows = match cursor {
            Some(c) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM run_events \
                     WHERE session_id = ?1 AND (created_at_micros, id) > (?2, ?3) \
                     ORDER BY created_at_micros ASC, id ASC LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![session_id, c.created_at_micros, c.id, limit],
                    event_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM run_events WHERE session_id = ?1 \
                     ORDER BY created_at_micros ASC, id ASC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![session_id, limit], event_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        let next_cursor = if rows.len() as i64 == limit {
            rows.last().map(|e| EventCursor {
                created_at_micros: datetime_to_micros(e.created_at),
                id: e.id,
            })
        } else {
            None
        };
        Ok((rows, next_cursor))
    }
}
