use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::feed::{FeedSender, ScheduleEvent};
use crate::types::{
    CreateInput, DuePage, ListFilter, ListPage, PageCursor, Schedule, ScheduleStatus,
    TransitionFields,
};

const COLUMNS: &str = "id, due_at, url, method, headers, body, status, result, \
                       started_at, completed_at, canceled_at, created_at";

/// Thread-safe schedule store over a single SQLite connection.
///
/// Wraps the connection in a `Mutex` (collector, executor, and API callers
/// may share one instance). Cross-process coordination does not rely on the
/// mutex at all — every writer goes through [`compare_and_transition`],
/// which stays correct with any number of store instances over the same
/// database file.
///
/// [`compare_and_transition`]: ScheduleStore::compare_and_transition
pub struct ScheduleStore {
    db: Mutex<Connection>,
    /// If set, every committed mutation is mirrored onto the change feed.
    feed: Option<FeedSender>,
}

impl ScheduleStore {
    /// Create a store, initialising the schema if needed.
    ///
    /// Pass `Some(tx)` to receive one [`ScheduleEvent`] per committed
    /// mutation. The send never blocks the write path.
    pub fn new(conn: Connection, feed: Option<FeedSender>) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            feed,
        })
    }

    /// Create a new schedule in `IDLE` with a generated UUID v7 id.
    pub fn create(&self, input: &CreateInput) -> Result<Schedule> {
        let id = Uuid::now_v7().to_string();
        self.create_with_id(&id, input)
    }

    /// Create a new schedule with a caller-supplied id.
    ///
    /// Fails with `AlreadyExists` when the id collides — callers that bring
    /// their own ids use this for create-idempotency.
    pub fn create_with_id(&self, id: &str, input: &CreateInput) -> Result<Schedule> {
        let headers_json = input
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now();

        let schedule = {
            let db = self.db.lock().unwrap();
            let inserted = db.execute(
                "INSERT INTO schedules
                 (id, due_at, url, method, headers, body, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'IDLE', ?7)",
                rusqlite::params![
                    id,
                    input.due_at.timestamp(),
                    input.url,
                    input.method.to_string(),
                    headers_json,
                    input.body,
                    now.timestamp(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::AlreadyExists { id: id.to_string() });
                }
                Err(e) => return Err(e.into()),
            }
            get_in(&db, id)?
        };

        debug!(schedule_id = %id, due_at = %schedule.due_at, "schedule created");
        self.emit(&schedule);
        Ok(schedule)
    }

    /// Point read. Fails with `NotFound` if the id is unknown.
    pub fn get(&self, id: &str) -> Result<Schedule> {
        let db = self.db.lock().unwrap();
        get_in(&db, id)
    }

    /// One page of `IDLE` schedules with `due_at <= before`, ascending
    /// `(due_at, id)`.
    ///
    /// Pass the returned cursor back in to continue; `next` is `None` once
    /// the backlog before `before` is exhausted. The collector re-invokes
    /// this on every tick, so membership here must track status exactly:
    /// only `IDLE` rows ever match.
    pub fn scan_due(
        &self,
        before: DateTime<Utc>,
        limit: u32,
        after: Option<&PageCursor>,
    ) -> Result<DuePage> {
        // Cursor sentinel below any real (due_at, id) pair.
        let (cursor_due, cursor_id) = match after {
            Some(c) => (c.due_at.timestamp(), c.id.as_str()),
            None => (i64::MIN, ""),
        };

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM schedules
             WHERE status = 'IDLE' AND due_at <= ?1 AND (due_at, id) > (?2, ?3)
             ORDER BY due_at, id
             LIMIT ?4"
        ))?;

        // Fetch one extra row to decide whether a continuation exists.
        let rows = stmt
            .query_map(
                rusqlite::params![before.timestamp(), cursor_due, cursor_id, limit as i64 + 1],
                read_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut schedules = rows
            .into_iter()
            .map(parse_row)
            .collect::<Result<Vec<_>>>()?;

        let next = if schedules.len() > limit as usize {
            schedules.truncate(limit as usize);
            schedules.last().map(PageCursor::of)
        } else {
            None
        };

        Ok(DuePage { schedules, next })
    }

    /// Atomically move `id` from `expected` to `new`, writing the
    /// accompanying fields, and return the post-mutation record.
    ///
    /// Zero rows updated means either the id is unknown (`NotFound`) or
    /// another writer changed the status first (`Conflict`, carrying what
    /// the status actually is). A `Conflict` is the expected outcome of a
    /// lost race and is never fatal to the caller's loop.
    pub fn compare_and_transition(
        &self,
        id: &str,
        expected: ScheduleStatus,
        new: ScheduleStatus,
        fields: &TransitionFields,
    ) -> Result<Schedule> {
        if !expected.can_transition(new) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: new,
            });
        }

        let updated = {
            let db = self.db.lock().unwrap();
            let changed = db.execute(
                "UPDATE schedules SET
                     status       = ?1,
                     started_at   = COALESCE(?2, started_at),
                     completed_at = COALESCE(?3, completed_at),
                     canceled_at  = COALESCE(?4, canceled_at),
                     result       = COALESCE(?5, result)
                 WHERE id = ?6 AND status = ?7",
                rusqlite::params![
                    new.to_string(),
                    fields.started_at.map(|t| t.timestamp()),
                    fields.completed_at.map(|t| t.timestamp()),
                    fields.canceled_at.map(|t| t.timestamp()),
                    fields.result,
                    id,
                    expected.to_string(),
                ],
            )?;

            if changed == 0 {
                // Unknown id or lost race — a point read disambiguates.
                let actual = get_in(&db, id)?;
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected,
                    actual: actual.status,
                });
            }
            get_in(&db, id)?
        };

        debug!(schedule_id = %id, from = %expected, to = %new, "transition committed");
        self.emit(&updated);
        Ok(updated)
    }

    /// Cancel an `IDLE` schedule. The usual CAS semantics apply: if the
    /// collector already promoted it, this reports `Conflict` ("already
    /// queued, cannot cancel").
    pub fn cancel(&self, id: &str) -> Result<Schedule> {
        self.compare_and_transition(
            id,
            ScheduleStatus::Idle,
            ScheduleStatus::Canceled,
            &TransitionFields {
                canceled_at: Some(Utc::now()),
                ..Default::default()
            },
        )
    }

    /// Filtered listing for the API collaborator, ascending `(due_at, id)`
    /// with the same keyset cursor as the due scan. Reads the table
    /// directly — independent of the collector's own scan.
    pub fn list(
        &self,
        filter: &ListFilter,
        limit: u32,
        after: Option<&PageCursor>,
    ) -> Result<ListPage> {
        let mut sql = format!("SELECT {COLUMNS} FROM schedules WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            params.push(Box::new(status.to_string()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(from) = filter.due_from {
            params.push(Box::new(from.timestamp()));
            sql.push_str(&format!(" AND due_at >= ?{}", params.len()));
        }
        if let Some(until) = filter.due_until {
            params.push(Box::new(until.timestamp()));
            sql.push_str(&format!(" AND due_at <= ?{}", params.len()));
        }
        if let Some(cursor) = after {
            params.push(Box::new(cursor.due_at.timestamp()));
            let due_idx = params.len();
            params.push(Box::new(cursor.id.clone()));
            sql.push_str(&format!(
                " AND (due_at, id) > (?{due_idx}, ?{})",
                params.len()
            ));
        }
        params.push(Box::new(limit as i64 + 1));
        sql.push_str(&format!(" ORDER BY due_at, id LIMIT ?{}", params.len()));

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                read_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut schedules = rows
            .into_iter()
            .map(parse_row)
            .collect::<Result<Vec<_>>>()?;

        let next = if schedules.len() > limit as usize {
            schedules.truncate(limit as usize);
            schedules.last().map(PageCursor::of)
        } else {
            None
        };

        Ok(ListPage { schedules, next })
    }

    /// Mirror a committed mutation onto the change feed.
    fn emit(&self, schedule: &Schedule) {
        if let Some(ref feed) = self.feed {
            let event = ScheduleEvent {
                schedule: schedule.clone(),
            };
            if feed.send(event).is_err() {
                warn!(schedule_id = %schedule.id, "change feed closed — event dropped");
            }
        }
    }
}

/// Point read against an already-locked connection.
fn get_in(db: &Connection, id: &str) -> Result<Schedule> {
    let row = db.query_row(
        &format!("SELECT {COLUMNS} FROM schedules WHERE id = ?1"),
        rusqlite::params![id],
        read_row,
    );
    match row {
        Ok(parts) => parse_row(parts),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound { id: id.into() }),
        Err(e) => Err(e.into()),
    }
}

type RawRow = (
    String,         // id
    i64,            // due_at
    String,         // url
    String,         // method
    Option<String>, // headers JSON
    Option<String>, // body
    String,         // status
    Option<String>, // result
    Option<i64>,    // started_at
    Option<i64>,    // completed_at
    Option<i64>,    // canceled_at
    i64,            // created_at
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

/// Map a raw row to a `Schedule`, rejecting rather than dropping bad data.
fn parse_row(parts: RawRow) -> Result<Schedule> {
    let (
        id,
        due_at,
        url,
        method,
        headers,
        body,
        status,
        result,
        started_at,
        completed_at,
        canceled_at,
        created_at,
    ) = parts;

    Ok(Schedule {
        id,
        due_at: from_ts(due_at)?,
        url,
        method: method.parse().map_err(StoreError::InvalidRecord)?,
        headers: headers
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        body,
        status: status.parse().map_err(StoreError::InvalidRecord)?,
        result,
        started_at: started_at.map(from_ts).transpose()?,
        completed_at: completed_at.map(from_ts).transpose()?,
        canceled_at: canceled_at.map(from_ts).transpose()?,
        created_at: from_ts(created_at)?,
    })
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::InvalidRecord(format!("bad timestamp: {secs}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;

    use super::*;
    use crate::feed::feed_channel;
    use crate::types::HttpMethod;

    fn store() -> ScheduleStore {
        ScheduleStore::new(Connection::open_in_memory().unwrap(), None).unwrap()
    }

    fn input(due_at: DateTime<Utc>) -> CreateInput {
        CreateInput {
            due_at,
            url: "https://example.com/hook".into(),
            method: HttpMethod::Post,
            headers: None,
            body: Some(r#"{"hello":"world"}"#.into()),
        }
    }

    fn past() -> DateTime<Utc> {
        Utc::now() - Duration::minutes(5)
    }

    fn future() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn create_then_get_roundtrips() {
        let store = store();
        let mut headers = BTreeMap::new();
        headers.insert("x-token".to_string(), "s3cret".to_string());

        let created = store
            .create(&CreateInput {
                headers: Some(headers.clone()),
                ..input(future())
            })
            .unwrap();
        assert_eq!(created.status, ScheduleStatus::Idle);
        assert!(created.started_at.is_none());

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.headers, Some(headers));
        assert_eq!(fetched.body.as_deref(), Some(r#"{"hello":"world"}"#));
        assert_eq!(fetched.due_at.timestamp(), created.due_at.timestamp());
    }

    #[test]
    fn duplicate_id_is_already_exists() {
        let store = store();
        store.create_with_id("dup", &input(future())).unwrap();
        let err = store.create_with_id("dup", &input(future())).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { id } if id == "dup"));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let err = store().get("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn scan_due_sees_only_due_idle_records() {
        let store = store();
        let due = store.create(&input(past())).unwrap();
        let not_due = store.create(&input(future())).unwrap();
        let canceled = store.create(&input(past())).unwrap();
        store.cancel(&canceled.id).unwrap();

        let page = store.scan_due(Utc::now(), 10, None).unwrap();
        let ids: Vec<_> = page.schedules.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![due.id.as_str()]);
        assert!(!ids.contains(&not_due.id.as_str()));
        assert!(page.next.is_none());
    }

    #[test]
    fn scan_due_orders_ascending_and_paginates() {
        let store = store();
        let base = Utc::now() - Duration::minutes(10);
        for i in 0..5 {
            store
                .create(&input(base + Duration::minutes(i)))
                .unwrap();
        }

        let first = store.scan_due(Utc::now(), 2, None).unwrap();
        assert_eq!(first.schedules.len(), 2);
        let cursor = first.next.clone().expect("more pages expected");

        let second = store.scan_due(Utc::now(), 2, Some(&cursor)).unwrap();
        assert_eq!(second.schedules.len(), 2);

        let third = store
            .scan_due(Utc::now(), 2, second.next.as_ref())
            .unwrap();
        assert_eq!(third.schedules.len(), 1);
        assert!(third.next.is_none());

        let all: Vec<_> = first
            .schedules
            .iter()
            .chain(&second.schedules)
            .chain(&third.schedules)
            .map(|s| s.due_at)
            .collect();
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted, "pages must come back in due_at order");
    }

    #[test]
    fn promoted_schedule_leaves_the_scan() {
        let store = store();
        let s = store.create(&input(past())).unwrap();

        store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap();

        let page = store.scan_due(Utc::now(), 10, None).unwrap();
        assert!(page.schedules.is_empty());
    }

    #[test]
    fn cas_loser_gets_conflict_and_record_queued_once() {
        let store = store();
        let s = store.create(&input(past())).unwrap();

        let won = store.compare_and_transition(
            &s.id,
            ScheduleStatus::Idle,
            ScheduleStatus::Queued,
            &TransitionFields::default(),
        );
        assert!(won.is_ok());

        // Second promotion attempt (duplicate collector run) loses.
        let lost = store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap_err();
        assert!(lost.is_conflict());
        match lost {
            StoreError::Conflict { expected, actual, .. } => {
                assert_eq!(expected, ScheduleStatus::Idle);
                assert_eq!(actual, ScheduleStatus::Queued);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        assert_eq!(store.get(&s.id).unwrap().status, ScheduleStatus::Queued);
    }

    #[test]
    fn cancel_after_promotion_conflicts_and_leaves_status() {
        let store = store();
        let s = store.create(&input(past())).unwrap();
        store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap();

        let err = store.cancel(&s.id).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(&s.id).unwrap().status, ScheduleStatus::Queued);
        assert!(store.get(&s.id).unwrap().canceled_at.is_none());
    }

    #[test]
    fn cancel_idle_sets_canceled_at_and_hides_from_scan() {
        let store = store();
        let s = store.create(&input(future())).unwrap();

        let canceled = store.cancel(&s.id).unwrap();
        assert_eq!(canceled.status, ScheduleStatus::Canceled);
        assert!(canceled.canceled_at.is_some());

        // Even once due, a canceled schedule never shows up.
        let page = store
            .scan_due(Utc::now() + Duration::hours(2), 10, None)
            .unwrap();
        assert!(page.schedules.is_empty());
    }

    #[test]
    fn terminal_write_happens_exactly_once() {
        let store = store();
        let s = store.create(&input(past())).unwrap();
        store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap();

        let now = Utc::now();
        store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Queued,
                ScheduleStatus::Succeeded,
                &TransitionFields {
                    completed_at: Some(now),
                    result: Some(r#"{"statusCode":200}"#.into()),
                    ..Default::default()
                },
            )
            .unwrap();

        // A redelivered event tries to fail the same schedule — rejected.
        let err = store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Queued,
                ScheduleStatus::Failed,
                &TransitionFields {
                    completed_at: Some(now),
                    result: Some(r#"{"error":"boom"}"#.into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.is_conflict());

        let final_record = store.get(&s.id).unwrap();
        assert_eq!(final_record.status, ScheduleStatus::Succeeded);
        assert_eq!(final_record.result.as_deref(), Some(r#"{"statusCode":200}"#));
    }

    #[test]
    fn illegal_edges_are_rejected_up_front() {
        let store = store();
        let s = store.create(&input(past())).unwrap();

        let err = store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Succeeded,
                ScheduleStatus::Idle,
                &TransitionFields::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn transition_on_unknown_id_is_not_found() {
        let err = store()
            .compare_and_transition(
                "missing",
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn mutations_emit_feed_events_in_order() {
        let (tx, mut rx) = feed_channel();
        let store = ScheduleStore::new(Connection::open_in_memory().unwrap(), Some(tx)).unwrap();

        let s = store.create(&input(past())).unwrap();
        store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Idle,
                ScheduleStatus::Queued,
                &TransitionFields::default(),
            )
            .unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.schedule.status, ScheduleStatus::Idle);
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.schedule.status, ScheduleStatus::Queued);
        assert_eq!(queued.schedule.id, s.id);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_transition_emits_nothing() {
        let (tx, mut rx) = feed_channel();
        let store = ScheduleStore::new(Connection::open_in_memory().unwrap(), Some(tx)).unwrap();

        let s = store.create(&input(past())).unwrap();
        let _ = rx.try_recv().unwrap(); // drain the create event

        let _ = store
            .compare_and_transition(
                &s.id,
                ScheduleStatus::Queued,
                ScheduleStatus::Succeeded,
                &TransitionFields::default(),
            )
            .unwrap_err();
        assert!(rx.try_recv().is_err(), "lost CAS must not emit an event");
    }

    #[test]
    fn list_filters_by_status_and_due_range() {
        let store = store();
        let early = store.create(&input(past())).unwrap();
        let late = store.create(&input(future())).unwrap();
        let done = store.create(&input(past())).unwrap();
        store.cancel(&done.id).unwrap();

        let idle_only = store
            .list(
                &ListFilter {
                    status: Some(ScheduleStatus::Idle),
                    ..Default::default()
                },
                10,
                None,
            )
            .unwrap();
        let ids: Vec<_> = idle_only.schedules.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

        let upcoming = store
            .list(
                &ListFilter {
                    due_from: Some(Utc::now()),
                    ..Default::default()
                },
                10,
                None,
            )
            .unwrap();
        assert_eq!(upcoming.schedules.len(), 1);
        assert_eq!(upcoming.schedules[0].id, late.id);
    }

    #[test]
    fn list_paginates_with_cursor() {
        let store = store();
        let base = Utc::now() - Duration::minutes(10);
        for i in 0..3 {
            store.create(&input(base + Duration::minutes(i))).unwrap();
        }

        let first = store.list(&ListFilter::default(), 2, None).unwrap();
        assert_eq!(first.schedules.len(), 2);
        let cursor = first.next.expect("continuation expected");

        let rest = store
            .list(&ListFilter::default(), 2, Some(&cursor))
            .unwrap();
        assert_eq!(rest.schedules.len(), 1);
        assert!(rest.next.is_none());
    }
}
