//! Webhook handlers.
//!
//! Handlers never report failure to the caller: a notification that cannot
//! be delivered is logged and acknowledged anyway.

use axum::http::StatusCode;
use tracing::{debug, warn};

use fleet_core::{Component, InstanceStateName, InstanceUpdate, QueueUpdate};

use crate::WebhookState;

/// PUT /{state}/{instance_id}
pub async fn instance_state(
    state: WebhookState,
    instance_id: String,
    new_state: InstanceStateName,
) -> StatusCode {
    debug!(%instance_id, state = %new_state, "lifecycle notification");
    let update = InstanceUpdate::new(instance_id, new_state);
    if state.updates.send(vec![update]).await.is_err() {
        warn!(state = %new_state, "controller closed, lifecycle notification dropped");
    }
    StatusCode::OK
}

/// PUT /{component}/empty and PUT /{component}/available
pub async fn queue_signal(state: WebhookState, component: Component, has_items: bool) -> StatusCode {
    debug!(%component, has_items, "queue notification");
    let update = QueueUpdate {
        component,
        has_items,
    };
    if state.queue.send(update).await.is_err() {
        warn!(%component, "controller closed, queue notification dropped");
    }
    StatusCode::OK
}
