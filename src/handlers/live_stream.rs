// handlers/live_stream.rs - GET /api/live/stream handler
// Long-lived SSE connection carrying a tenant's live updates

use axum::{
    extract::Extension,
    response::sse::{Event, Sse},
};
use chrono::Utc;
use futures::{stream, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use crate::config;
use crate::live::{LiveEventKind, LiveUpdate, LiveUpdateBroker};
use crate::middleware::tenant::ResolvedTenant;

/// Stream a tenant's live updates over SSE.
///
/// Opens with a `connected` liveness payload, then forwards every broker
/// payload as one event, interleaved with a synthetic `ping` on a fixed
/// interval. When the client disconnects axum drops the stream, which
/// detaches the broker subscription and stops the ping timer with it.
pub async fn live_stream(
    Extension(broker): Extension<Arc<LiveUpdateBroker>>,
    Extension(resolved): Extension<ResolvedTenant>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tenant_id = resolved.tenant.restaurant_id.clone();
    let subscription = broker
        .subscribe(&tenant_id, resolved.cross_process_enabled)
        .await;

    tracing::debug!("SSE listener attached for tenant {}", tenant_id);

    let connected = LiveUpdate {
        tenant_id: tenant_id.clone(),
        event: LiveEventKind::Heartbeat,
        data: json!({"status": "connected"}),
        timestamp: Utc::now(),
    };
    let initial = stream::once(futures::future::ready(to_sse_event(&connected)));

    let updates = subscription
        .into_stream()
        .map(|update| to_sse_event(&update));

    let period = Duration::from_secs(config::config().live.ping_interval_secs);
    let pings = IntervalStream::new(tokio::time::interval_at(
        tokio::time::Instant::now() + period,
        period,
    ))
    .map(|_| Ok::<_, Infallible>(Event::default().event("ping").data("{}")));

    Sse::new(initial.chain(stream::select(updates, pings)))
}

fn to_sse_event(update: &LiveUpdate) -> Result<Event, Infallible> {
    let event = match serde_json::to_string(update) {
        Ok(data) => Event::default().event(update.event.as_str()).data(data),
        Err(e) => {
            tracing::error!("Failed to serialize live update: {}", e);
            Event::default().event("error").data("{}")
        }
    };
    Ok(event)
}
