//! Server-Sent Events endpoint

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - engine events (bucket publishes, connection changes, fetch results)
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    dss_common::sse::event_bus_sse_stream(&ctx.event_bus, "dss-fulfill")
}
