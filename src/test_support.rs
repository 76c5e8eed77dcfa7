//! Shared helpers for unit tests: a throwaway remote server and fixture keys

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::data::User;
use crate::tenancy::Tenant;

pub(crate) const PRIVATE_KEY: &str = include_str!("../tests/fixtures/test_private_key.pem");
pub(crate) const PUBLIC_KEY: &str = include_str!("../tests/fixtures/test_public_key.pem");

#[derive(Clone, Default)]
struct PeerState {
    base: Arc<Mutex<String>>,
    actor_fetches: Arc<AtomicUsize>,
    deliveries: Arc<Mutex<Vec<Value>>>,
}

/// A remote server hosting actors at `/users/{name}` with inboxes
pub(crate) struct Peer {
    pub base: String,
    state: PeerState,
}

impl Peer {
    pub fn actor_url(&self, name: &str) -> String {
        format!("{}/users/{}", self.base, name)
    }

    pub fn actor_fetches(&self) -> usize {
        self.state.actor_fetches.load(Ordering::SeqCst)
    }

    /// Activities POSTed to any inbox, in arrival order
    pub fn deliveries(&self) -> Vec<Value> {
        self.state
            .deliveries
            .lock()
            .unwrap()
            .clone()
    }

    pub fn deliveries_of_type(&self, activity_type: &str) -> usize {
        self.deliveries()
            .iter()
            .filter(|activity| activity["type"] == activity_type)
            .count()
    }
}

async fn actor(State(state): State<PeerState>, Path(name): Path<String>) -> impl IntoResponse {
    state.actor_fetches.fetch_add(1, Ordering::SeqCst);
    if name == "missing" {
        return StatusCode::NOT_FOUND.into_response();
    }

    let base = state.base.lock().unwrap().clone();
    let id = format!("{}/users/{}", base, name);
    (
        [(header::CONTENT_TYPE, "application/activity+json")],
        Json(json!({
            "id": id,
            "type": "Person",
            "preferredUsername": name,
            "name": format!("Remote {}", name),
            "inbox": format!("{}/inbox", id),
            "icon": { "type": "Image", "url": format!("{}/avatars/{}.png", base, name) }
        })),
    )
        .into_response()
}

async fn inbox(
    State(state): State<PeerState>,
    Path(_name): Path<String>,
    body: axum::body::Bytes,
) -> StatusCode {
    let Ok(activity) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    state.deliveries.lock().unwrap().push(activity);
    StatusCode::ACCEPTED
}

pub(crate) async fn spawn_peer() -> Peer {
    let state = PeerState::default();
    let app = Router::new()
        .route("/users/:name", get(actor))
        .route("/users/:name/inbox", axum::routing::post(inbox))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    *state.base.lock().unwrap() = base.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Peer { base, state }
}

/// The tenant owner with the fixture key pair installed
pub(crate) async fn owner_with_keys(tenant: &Arc<Tenant>) -> User {
    let database = tenant.database();
    let owner = database
        .get_user_by_username("owner")
        .await
        .unwrap()
        .unwrap();
    database
        .set_user_keys_if_absent(&owner.id, PRIVATE_KEY, PUBLIC_KEY)
        .await
        .unwrap();
    database.get_user(&owner.id).await.unwrap().unwrap()
}
