use std::sync::Arc;
use std::time::Duration;

use chime_core::config::ExecutorConfig;
use chime_core::Clock;
use chime_store::{
    FeedReceiver, Schedule, ScheduleEvent, ScheduleStatus, ScheduleStore, TransitionFields,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::result::CallbackResult;

/// Worker that executes queued schedules and records their outcome.
pub struct Executor {
    store: Arc<ScheduleStore>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(store: Arc<ScheduleStore>, clock: Arc<dyn Clock>, config: ExecutorConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            clock,
            config,
        }
    }

    /// Main loop. Drains feed events until the feed closes or `shutdown`
    /// broadcasts `true`. Store faults drop the event (the feed's
    /// redelivery, not an inner loop, brings it back).
    pub async fn run(self, mut events: FeedReceiver, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_attempts = self.config.max_attempts,
            timeout_secs = self.config.request_timeout_secs,
            "executor started"
        );

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                error!("executor dropped event: {e}");
                            }
                        }
                        None => {
                            info!("change feed closed — executor stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("executor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process one feed event end to end.
    ///
    /// Only transitions *into* `QUEUED` trigger execution. The
    /// `QUEUED -> QUEUED` stamp of `started_at` doubles as the duplicate
    /// filter: if it conflicts, another delivery already resolved (or is
    /// resolving) this schedule and we skip entirely.
    pub async fn handle_event(&self, event: ScheduleEvent) -> Result<()> {
        let record = event.schedule;
        if record.status != ScheduleStatus::Queued {
            return Ok(());
        }

        let claimed = self.store.compare_and_transition(
            &record.id,
            ScheduleStatus::Queued,
            ScheduleStatus::Queued,
            &TransitionFields {
                started_at: Some(self.clock.now()),
                ..Default::default()
            },
        );
        let schedule = match claimed {
            Ok(s) => s,
            Err(e) if e.is_conflict() => {
                debug!(schedule_id = %record.id, "duplicate delivery — already resolved, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (outcome, result) = self.perform_callback(&schedule).await;

        let recorded = self.store.compare_and_transition(
            &schedule.id,
            ScheduleStatus::Queued,
            outcome,
            &TransitionFields {
                completed_at: Some(self.clock.now()),
                result: Some(result.to_json()),
                ..Default::default()
            },
        );
        match recorded {
            Ok(_) => {
                info!(schedule_id = %schedule.id, outcome = %outcome, "callback outcome recorded");
            }
            Err(e) if e.is_conflict() => {
                // The idempotency boundary: a redelivered event raced us to
                // the terminal write. The callback may have run twice; the
                // stored outcome is whoever won, exactly once.
                debug!(schedule_id = %schedule.id, "terminal state already written");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Issue the stored request, retrying transport errors and 5xx with
    /// capped exponential backoff until the attempt budget runs out.
    /// Returns the terminal status plus the last observed result.
    async fn perform_callback(&self, schedule: &Schedule) -> (ScheduleStatus, CallbackResult) {
        let budget = self.config.max_attempts.max(1);
        let mut last = CallbackResult::default();

        for attempt in 1..=budget {
            if attempt > 1 {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }

            last = match self.send_once(schedule).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(schedule_id = %schedule.id, attempt, "callback transport error: {e}");
                    CallbackResult::from_error(&e)
                }
            };

            if last.is_success() {
                return (ScheduleStatus::Succeeded, last);
            }
            if !last.is_retryable() {
                // A delivered non-2xx, non-5xx response is a final answer.
                return (ScheduleStatus::Failed, last);
            }
            if attempt < budget {
                warn!(
                    schedule_id = %schedule.id,
                    attempt,
                    status = ?last.status_code,
                    "callback attempt failed — retrying"
                );
            }
        }

        (ScheduleStatus::Failed, last)
    }

    async fn send_once(&self, schedule: &Schedule) -> reqwest::Result<CallbackResult> {
        let mut req = self
            .client
            .request(to_reqwest_method(schedule.method), &schedule.url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs));

        match &schedule.headers {
            Some(headers) => {
                for (name, value) in headers {
                    req = req.header(name.as_str(), value.as_str());
                }
            }
            None if self.config.default_headers => {
                req = req
                    .header("accept", "application/json")
                    .header("content-type", "application/json;charset=utf-8");
            }
            None => {}
        }

        if let Some(ref body) = schedule.body {
            req = req.body(body.clone());
        }

        let resp = req.send().await?;
        Ok(CallbackResult::from_response(resp).await)
    }

    /// Delay before `attempt` (attempts are 1-based; the first has none):
    /// `base * 2^(attempt - 2)`, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let ms = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

fn to_reqwest_method(method: chime_store::HttpMethod) -> reqwest::Method {
    use chime_store::HttpMethod;
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}
