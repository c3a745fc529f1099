//! Per-filter subscription registry.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use nova_core::ResultEvent;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Bounded channel capacity per filter.
///
/// When a slow consumer falls more than this many chunks behind, the oldest
/// chunks are dropped (ring-buffer behavior) and the subscription is marked
/// lagged. Blocking the producer or disconnecting the client are both worse:
/// the producer is shared across many sessions, and a disconnect loses the
/// terminal chunk too.
pub const SUBSCRIPTION_CAPACITY: usize = 64;

struct FilterEntry {
    sender: broadcast::Sender<ResultEvent>,
    seq: AtomicU64,
}

/// Fan-out hub: `filter → subscribers`.
///
/// Publishing is non-blocking and stamps a monotone per-filter `seq` onto
/// every chunk, which clients use to deduplicate broker redeliveries.
/// Within one filter, subscribers observe chunks in publish order; across
/// filters there is no ordering guarantee.
pub struct StreamHub {
    filters: DashMap<String, FilterEntry>,
    capacity: usize,
}

impl StreamHub {
    /// Create a hub with the default per-subscriber capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIPTION_CAPACITY)
    }

    /// Create a hub with a custom capacity (tests).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            filters: DashMap::new(),
            capacity,
        }
    }

    /// Register a subscriber for a filter.
    ///
    /// Chunks published after this call are guaranteed to reach the
    /// subscription (or be accounted for in its lag counter): a subscriber
    /// never silently misses a chunk produced after it subscribed.
    #[must_use]
    pub fn subscribe(&self, filter: &str) -> Subscription {
        let receiver = self
            .filters
            .entry(filter.to_string())
            .or_insert_with(|| FilterEntry {
                sender: broadcast::channel(self.capacity).0,
                seq: AtomicU64::new(0),
            })
            .sender
            .subscribe();
        debug!(filter, "subscription registered");
        Subscription {
            filter: filter.to_string(),
            receiver,
            lagged: false,
            dropped: 0,
            pending: None,
        }
    }

    /// Copy a chunk to every subscriber of `filter`.
    ///
    /// Returns the number of subscribers that received it. Filters without
    /// subscribers are pruned on the way out, so a detached client costs
    /// nothing after its next publish.
    pub fn publish(&self, filter: &str, event: &ResultEvent) -> usize {
        let Some(entry) = self.filters.get(filter) else {
            trace!(filter, "no subscribers for chunk");
            return 0;
        };
        let seq = entry.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut stamped = event.clone();
        stamped.seq = seq;
        let delivered = entry.sender.send(stamped).unwrap_or(0);
        let empty = entry.sender.receiver_count() == 0;
        drop(entry);
        if empty {
            self.filters
                .remove_if(filter, |_, entry| entry.sender.receiver_count() == 0);
        }
        delivered
    }

    /// Number of live subscribers for a filter.
    #[must_use]
    pub fn subscriber_count(&self, filter: &str) -> usize {
        self.filters
            .get(filter)
            .map_or(0, |entry| entry.sender.receiver_count())
    }

    /// Number of registered filters (test observability).
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("filters", &self.filters.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// One SSE client's view of a filter.
///
/// Dropping the subscription cancels it; the hub notices the closed channel
/// and prunes the filter entry on the next publish.
pub struct Subscription {
    filter: String,
    receiver: broadcast::Receiver<ResultEvent>,
    lagged: bool,
    dropped: u64,
    pending: Option<ResultEvent>,
}

impl Subscription {
    /// The filter this subscription watches.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether chunks were dropped due to slow consumption.
    #[must_use]
    pub fn lagged(&self) -> bool {
        self.lagged
    }

    /// Receive the next chunk.
    ///
    /// Returns `None` when the filter is gone and no chunks remain. A lagged
    /// subscriber receives a synthesized `lag` notice immediately before the
    /// terminal chunk, so the client knows the assembled stream may be
    /// incomplete.
    pub async fn recv(&mut self) -> Option<ResultEvent> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.lagged && event.is_final {
                        self.lagged = false;
                        let notice = ResultEvent::lag(self.dropped);
                        self.dropped = 0;
                        self.pending = Some(event);
                        return Some(notice);
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(filter = %self.filter, skipped = count, "subscriber lagged");
                    self.lagged = true;
                    self.dropped += count;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Cancel explicitly. Idempotent; equivalent to dropping.
    pub fn cancel(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("lagged", &self.lagged)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_core::{JobId, ResultEventKind, SessionId};

    fn hub() -> StreamHub {
        StreamHub::new()
    }

    #[tokio::test]
    async fn chunks_arrive_in_publish_order_with_monotone_seq() {
        let hub = hub();
        let session = SessionId::new();
        let mut subscription = hub.subscribe(session.as_str());

        for text in ["하나", "둘", "셋"] {
            hub.publish(session.as_str(), &ResultEvent::message(session.clone(), text));
        }

        let mut last_seq = 0;
        for expected in ["하나", "둘", "셋"] {
            let event = subscription.recv().await.unwrap();
            assert_eq!(event.data.as_str(), Some(expected));
            assert!(event.seq > last_seq);
            last_seq = event.seq;
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = hub();
        let delivered = hub.publish("nobody", &ResultEvent::error("x"));
        assert_eq!(delivered, 0);
        assert_eq!(hub.filter_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_every_chunk() {
        let hub = hub();
        let job = JobId::new();
        let mut a = hub.subscribe(job.as_str());
        let mut b = hub.subscribe(job.as_str());

        let delivered = hub.publish(
            job.as_str(),
            &ResultEvent::succeeded(job.clone(), serde_json::json!({"ok": true})),
        );
        assert_eq!(delivered, 2);
        assert_eq!(a.recv().await.unwrap().event, ResultEventKind::Succeeded);
        assert_eq!(b.recv().await.unwrap().event, ResultEventKind::Succeeded);
    }

    #[tokio::test]
    async fn slow_consumer_drops_oldest_and_sees_lag_before_final() {
        let hub = StreamHub::with_capacity(4);
        let session = SessionId::new();
        let mut subscription = hub.subscribe(session.as_str());

        for i in 0..20 {
            hub.publish(
                session.as_str(),
                &ResultEvent::message(session.clone(), format!("chunk-{i}")),
            );
        }
        hub.publish(session.as_str(), &ResultEvent::message_end(session.clone()));

        let mut saw_lag = false;
        let mut saw_final = false;
        while let Some(event) = subscription.recv().await {
            match event.event {
                ResultEventKind::Lag => {
                    assert!(!saw_final, "lag notice must precede the terminal chunk");
                    saw_lag = true;
                }
                ResultEventKind::MessageEnd => {
                    saw_final = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_lag);
        assert!(saw_final);
    }

    #[tokio::test]
    async fn cancelled_subscription_is_pruned_on_next_publish() {
        let hub = hub();
        let session = SessionId::new();
        let subscription = hub.subscribe(session.as_str());
        assert_eq!(hub.subscriber_count(session.as_str()), 1);
        subscription.cancel();
        assert_eq!(hub.subscriber_count(session.as_str()), 0);

        // The closed channel is detected and pruned by the next publish.
        hub.publish(session.as_str(), &ResultEvent::message(session.clone(), "x"));
        assert_eq!(hub.filter_count(), 0);
    }

    #[tokio::test]
    async fn filters_are_independent() {
        let hub = hub();
        let mut a = hub.subscribe("job-a");
        let _b = hub.subscribe("job-b");

        hub.publish("job-a", &ResultEvent::error("only for a"));
        let event = a.recv().await.unwrap();
        assert_eq!(event.data.as_str(), Some("only for a"));
        assert_eq!(hub.subscriber_count("job-b"), 1);
    }
}
