use tokio::sync::mpsc;

use crate::types::Schedule;

/// One change-feed entry: the full post-mutation record image.
///
/// The feed is at-least-once — consumers must tolerate duplicate delivery.
/// Per-key state never regresses because every consumer re-checks the
/// stored status through a compare-and-swap before acting.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
    pub schedule: Schedule,
}

pub type FeedSender = mpsc::UnboundedSender<ScheduleEvent>;
pub type FeedReceiver = mpsc::UnboundedReceiver<ScheduleEvent>;

/// Build the store→executor change-feed channel.
///
/// Unbounded so the store's write path never blocks on a slow consumer;
/// a closed receiver downgrades to a warning, not a write failure.
pub fn feed_channel() -> (FeedSender, FeedReceiver) {
    mpsc::unbounded_channel()
}
