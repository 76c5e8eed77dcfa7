//! A stand-in remote server with actors and recording inboxes

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct PeerState {
    base: Arc<Mutex<String>>,
    deliveries: Arc<Mutex<Vec<Value>>>,
}

pub struct Peer {
    pub base: String,
    state: PeerState,
}

impl Peer {
    pub async fn spawn() -> Self {
        let state = PeerState::default();
        let app = Router::new()
            .route("/users/:name", get(actor))
            .route("/users/:name/inbox", post(inbox))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        *state.base.lock().unwrap() = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, state }
    }

    pub fn actor_url(&self, name: &str) -> String {
        format!("{}/users/{}", self.base, name)
    }

    pub fn deliveries(&self) -> Vec<Value> {
        self.state.deliveries.lock().unwrap().clone()
    }

    pub fn deliveries_of_type(&self, activity_type: &str) -> usize {
        self.deliveries()
            .iter()
            .filter(|activity| activity["type"] == activity_type)
            .count()
    }
}

async fn actor(State(state): State<PeerState>, Path(name): Path<String>) -> impl IntoResponse {
    let base = state.base.lock().unwrap().clone();
    let id = format!("{}/users/{}", base, name);
    (
        [(header::CONTENT_TYPE, "application/activity+json")],
        Json(json!({
            "id": id,
            "type": "Person",
            "preferredUsername": name,
            "name": format!("Remote {}", name),
            "inbox": format!("{}/inbox", id)
        })),
    )
}

async fn inbox(
    State(state): State<PeerState>,
    Path(_name): Path<String>,
    body: Bytes,
) -> StatusCode {
    match serde_json::from_slice::<Value>(&body) {
        Ok(activity) => {
            state.deliveries.lock().unwrap().push(activity);
            StatusCode::ACCEPTED
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}
