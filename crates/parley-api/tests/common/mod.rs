//! Shared harness: an in-process server on an ephemeral port backed by the
//! in-memory store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use parley_api::{build_router, AppState, StreamConfig};
use parley_core::EventBus;
use parley_db::{MemoryConversationRepository, StaticIdentityResolver};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct User {
    pub id: Uuid,
    pub token: String,
}

pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub repo: Arc<MemoryConversationRepository>,
    pub state: AppState,
    pub users: Vec<User>,
}

impl TestServer {
    pub async fn start(user_count: usize) -> Self {
        Self::start_with(user_count, StreamConfig::default()).await
    }

    pub async fn start_with(user_count: usize, stream_config: StreamConfig) -> Self {
        let users: Vec<User> = (0..user_count)
            .map(|_| {
                let id = Uuid::new_v4();
                User {
                    id,
                    token: format!("tok-{}", id),
                }
            })
            .collect();
        let identity = users
            .iter()
            .fold(StaticIdentityResolver::new(), |r, u| r.with_token(&u.token, u.id));

        let repo = Arc::new(MemoryConversationRepository::new());
        let state = AppState::new(repo.clone(), Arc::new(identity), Arc::new(EventBus::new()))
            .with_stream_config(stream_config);
        let app = build_router(
            state.clone(),
            vec![axum::http::HeaderValue::from_static("http://localhost:3000")],
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            repo,
            state,
            users,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn user(&self, n: usize) -> &User {
        &self.users[n]
    }

    pub async fn get(&self, user: &User, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap()
    }

    pub async fn post(&self, user: &User, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(&user.token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Create a conversation owned by `owner` including `others`.
    pub async fn conversation(&self, owner: &User, others: &[&User]) -> Uuid {
        let ids: Vec<Uuid> = others.iter().map(|u| u.id).collect();
        let response = self
            .post(
                owner,
                "/api/v1/conversations",
                serde_json::json!({ "participantIds": ids }),
            )
            .await;
        assert_eq!(response.status(), 201);
        let body: Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn send(&self, user: &User, conversation_id: Uuid, content: &str) -> Value {
        let response = self
            .post(
                user,
                &format!("/api/v1/conversations/{}/messages", conversation_id),
                serde_json::json!({ "content": content }),
            )
            .await;
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    /// Open an event stream and wait until its subscription is registered.
    pub async fn connect(&self, user: &User) -> SseClient {
        let before = self.state.event_bus.subscriber_count_for(user.id);
        let response = self
            .client
            .get(self.url("/api/v1/stream"))
            .bearer_auth(&user.token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        self.wait_for_subscribers(user.id, before + 1).await;
        SseClient::new(response)
    }

    pub async fn wait_for_subscribers(&self, user_id: Uuid, count: usize) {
        let bus = Arc::clone(&self.state.event_bus);
        tokio::time::timeout(WAIT, async move {
            while bus.subscriber_count_for(user_id) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscriber count not reached");
    }
}

/// Minimal server-sent events reader.
pub struct SseClient {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseClient {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    /// Next `data:` payload, raw. `None` when the stream ends.
    pub async fn next_raw(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let data: Vec<&str> = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(|d| d.strip_prefix(' ').unwrap_or(d))
                    .collect();
                if data.is_empty() {
                    continue;
                }
                return Some(data.join("\n"));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                _ => return None,
            }
        }
    }

    /// Next event as JSON, failing the test after [`WAIT`].
    pub async fn next_event(&mut self) -> Value {
        let raw = tokio::time::timeout(WAIT, self.next_raw())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended");
        serde_json::from_str(&raw).unwrap()
    }

    /// Next non-keepalive event.
    pub async fn next_non_keepalive(&mut self) -> Value {
        loop {
            let event = self.next_event().await;
            if event["type"] != "keepalive" {
                return event;
            }
        }
    }

    /// Assert nothing but keepalives arrives within `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.next_raw()).await {
                Err(_) => return,
                Ok(Some(raw)) => {
                    let event: Value = serde_json::from_str(&raw).unwrap();
                    assert_eq!(event["type"], "keepalive", "unexpected event: {}", raw);
                }
                Ok(None) => panic!("stream ended"),
            }
        }
    }

    /// Whether the server ends the stream within `window`.
    pub async fn ends_within(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.next_raw()).await {
                Err(_) => return false,
                Ok(None) => return true,
                Ok(Some(_)) => continue,
            }
        }
    }
}
