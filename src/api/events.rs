//! Server-Sent Events stream of workflow transitions

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::{error::AppResult, AppState};

use super::AuthenticatedUser;

/// Subscribe to transaction events. Admins receive every event, other
/// users only those concerning their own transactions.
#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "text/event-stream of DomainEvent payloads", body = crate::services::events::DomainEvent),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn stream_events(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let actor = claims.actor();
    tracing::debug!(user_id = actor.id, "Event stream opened");

    let stream = BroadcastStream::new(state.services.events.subscribe()).filter_map(move |message| {
        let event = match message {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(user_id = actor.id, "Event stream lagging: {}", e);
                return None;
            }
        };
        if !actor.is_admin() && event.user_id != actor.id {
            return None;
        }

        match Event::default().event(event.kind.as_str()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!("Failed to encode event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
