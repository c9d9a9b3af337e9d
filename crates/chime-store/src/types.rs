use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP method of a callback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unknown http method: {other}")),
        }
    }
}

/// Lifecycle state of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// Waiting for its due time; the only state the due scan sees.
    Idle,
    /// Promoted by the collector, awaiting execution.
    Queued,
    /// Callback completed with a 2xx response.
    Succeeded,
    /// Callback exhausted its attempt budget or got a non-2xx response.
    Failed,
    /// Canceled by the client while still idle.
    Canceled,
}

impl ScheduleStatus {
    /// Terminal states are absorbing — no edge leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScheduleStatus::Succeeded | ScheduleStatus::Failed | ScheduleStatus::Canceled
        )
    }

    /// The legal edges of the state machine. `Queued -> Queued` is the
    /// self-edge the executor uses to stamp `started_at` (and to detect
    /// duplicate feed deliveries).
    pub fn can_transition(self, to: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (self, to),
            (Idle, Queued)
                | (Idle, Canceled)
                | (Queued, Queued)
                | (Queued, Succeeded)
                | (Queued, Failed)
        )
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleStatus::Idle => "IDLE",
            ScheduleStatus::Queued => "QUEUED",
            ScheduleStatus::Succeeded => "SUCCEEDED",
            ScheduleStatus::Failed => "FAILED",
            ScheduleStatus::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(ScheduleStatus::Idle),
            "QUEUED" => Ok(ScheduleStatus::Queued),
            "SUCCEEDED" => Ok(ScheduleStatus::Succeeded),
            "FAILED" => Ok(ScheduleStatus::Failed),
            "CANCELED" => Ok(ScheduleStatus::Canceled),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

/// A persisted schedule record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// UUID v7 string — primary key, assigned at creation.
    pub id: String,
    /// Earliest instant execution may occur.
    pub due_at: DateTime<Utc>,
    /// Callback target.
    pub url: String,
    pub method: HttpMethod,
    /// Request headers; when absent the executor applies JSON defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub status: ScheduleStatus,
    /// Serialized response summary, set on the terminal transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The immutable request definition supplied at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInput {
    pub due_at: DateTime<Utc>,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Optional field writes carried by a status transition. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

/// Keyset continuation cursor — position in the `(due_at, id)` ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    pub due_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    pub fn of(schedule: &Schedule) -> Self {
        Self {
            due_at: schedule.due_at,
            id: schedule.id.clone(),
        }
    }
}

/// One page of the collector's due scan.
#[derive(Debug, Clone)]
pub struct DuePage {
    /// Idle schedules with `due_at <= before`, ascending `(due_at, id)`.
    pub schedules: Vec<Schedule>,
    /// `Some` when more rows may remain; pass back into the next scan.
    pub next: Option<PageCursor>,
}

/// Filter for the API-facing listing (independent of the collector's scan).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<ScheduleStatus>,
    pub due_from: Option<DateTime<Utc>>,
    pub due_until: Option<DateTime<Utc>>,
}

/// One page of a filtered listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub schedules: Vec<Schedule>,
    pub next: Option<PageCursor>,
}
