use std::sync::Arc;

use chime_core::config::CollectorConfig;
use chime_core::Clock;
use chime_store::{ScheduleStatus, ScheduleStore, StoreError, TransitionFields};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::Result;

/// Outcome of one collector run, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    /// Due `IDLE` schedules returned by the scan.
    pub scanned: usize,
    /// Promotions this run committed.
    pub promoted: usize,
    /// Promotions lost to a concurrent writer (duplicate run or a cancel).
    pub conflicts: usize,
}

/// Periodic process that promotes due schedules to `QUEUED`.
///
/// Stateless between runs: every tick starts a fresh scan against the
/// collector's own clock, so clock skew at creation time and arbitrarily
/// late items (collector was down) are both handled by construction.
pub struct Collector {
    store: Arc<ScheduleStore>,
    clock: Arc<dyn Clock>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(store: Arc<ScheduleStore>, clock: Arc<dyn Clock>, config: CollectorConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Main loop. Scans every `interval_secs` until `shutdown` broadcasts
    /// `true`. A run that errors mid-page is logged and abandoned; the next
    /// tick retries from the top.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            page_size = self.config.page_size,
            "collector started"
        );

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.collect_once() {
                        Ok(stats) if stats.scanned > 0 => {
                            info!(
                                scanned = stats.scanned,
                                promoted = stats.promoted,
                                conflicts = stats.conflicts,
                                "collector run complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("collector run aborted: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("collector shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full run: page through everything due as of now and promote each
    /// item. Store errors abort the run; CAS conflicts are counted and
    /// skipped.
    pub fn collect_once(&self) -> Result<CollectStats> {
        let now = self.clock.now();
        let mut stats = CollectStats::default();
        let mut cursor = None;

        loop {
            let page = self
                .store
                .scan_due(now, self.config.page_size, cursor.as_ref())?;
            stats.scanned += page.schedules.len();

            for schedule in &page.schedules {
                match self.store.compare_and_transition(
                    &schedule.id,
                    ScheduleStatus::Idle,
                    ScheduleStatus::Queued,
                    &TransitionFields::default(),
                ) {
                    Ok(_) => stats.promoted += 1,
                    Err(StoreError::Conflict { actual, .. }) => {
                        // Another collector run or a cancel got there first.
                        debug!(schedule_id = %schedule.id, %actual, "promotion lost race");
                        stats.conflicts += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(stats)
    }
}
