//! Job-scoped SSE: `GET /events/jobs/{job_id}`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;

use crate::state::AppState;

/// One `data:` line per result payload; the stream closes after the final
/// chunk. Duplicate chunks (broker redelivery) may appear; clients
/// deduplicate with the payload's `seq`.
pub(crate) async fn job_stream(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.hub.subscribe(&job_id);
    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(payload));
            if event.is_final {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
