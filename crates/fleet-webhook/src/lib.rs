//! fleet-webhook — HTTP ingress for lifecycle and queue notifications.
//!
//! Stateless translation from inbound `PUT` requests to typed events on the
//! controller's channels. Every recognised route answers `200 OK`, whether
//! or not the controller tracks the instance in question.
//!
//! # Routes
//!
//! | Method | Path | Event |
//! |---|---|---|
//! | PUT | `/{state}/{instance_id}` | `InstanceUpdate { instance_id, state }` |
//! | PUT | `/{component}/empty` | `QueueUpdate { component, has_items: false }` |
//! | PUT | `/{component}/available` | `QueueUpdate { component, has_items: true }` |
//!
//! `{state}` is one of the six provider state names (`pending`, `running`,
//! `stopping`, `stopped`, `shutting-down`, `terminated`) and `{component}`
//! is `spider` or `scraper`.

pub mod handlers;
pub mod server;

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::put;
use tokio::sync::mpsc;

use fleet_core::{Component, InstanceStateName, InstanceUpdate, QueueUpdate};

pub use server::WebhookServer;

/// Channels the webhook handlers publish to.
#[derive(Clone)]
pub struct WebhookState {
    pub updates: mpsc::Sender<Vec<InstanceUpdate>>,
    pub queue: mpsc::Sender<QueueUpdate>,
}

/// Build the webhook router with one route per state and per component.
pub fn build_router(state: WebhookState) -> Router {
    let mut router = Router::new();

    for instance_state in InstanceStateName::ALL {
        router = router.route(
            &format!("/{instance_state}/{{instance_id}}"),
            put(
                move |State(s): State<WebhookState>, Path(instance_id): Path<String>| {
                    handlers::instance_state(s, instance_id, instance_state)
                },
            ),
        );
    }

    for component in Component::ALL {
        router = router
            .route(
                &format!("/{component}/empty"),
                put(move |State(s): State<WebhookState>| {
                    handlers::queue_signal(s, component, false)
                }),
            )
            .route(
                &format!("/{component}/available"),
                put(move |State(s): State<WebhookState>| {
                    handlers::queue_signal(s, component, true)
                }),
            );
    }

    router.with_state(state)
}
