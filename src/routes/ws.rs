//! WebSocket endpoint. Clients authenticate with `?token=` and then send
//! `{"event": "subscribe" | "subscribe-progress" | "subscribe-activity",
//! "data": {..}}` frames; hub events are forwarded as they arrive.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::hub::Topic;
use crate::models::{parse_id, Role};
use crate::state::AppState;

const OUTBOX_CAPACITY: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

#[derive(Deserialize)]
struct WsParams {
    token: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
enum ClientFrame {
    Subscribe {
        #[serde(rename = "userId")]
        user_id: String,
    },
    SubscribeProgress {
        #[serde(rename = "userId")]
        user_id: String,
    },
    SubscribeActivity {
        #[serde(rename = "courseId")]
        course_id: String,
    },
}

fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn topic_name(topic: Topic) -> String {
    match topic {
        Topic::Notifications(id) => format!("notifications:{id}"),
        Topic::Progress(id) => format!("progress:{id}"),
        Topic::Activity(id) => format!("activity:{id}"),
    }
}

async fn upgrade(
    State(st): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let token = params
        .token
        .ok_or_else(|| AppError::Unauthorized("missing token".to_string()))?;
    let auth = AuthUser::from(st.jwt.verify(&token)?);
    Ok(ws.on_upgrade(move |socket| session(st, auth, socket)))
}

/// Resolves a client frame to the topic it asks for, enforcing who may
/// listen to what.
async fn resolve(st: &AppState, auth: &AuthUser, text: &str) -> Result<Topic> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|e| AppError::validation(format!("unrecognized frame: {e}")))?;
    match frame {
        ClientFrame::Subscribe { user_id } => {
            let id = parse_id("userId", &user_id)?;
            auth.require_self_or_staff(id)?;
            Ok(Topic::Notifications(id))
        }
        ClientFrame::SubscribeProgress { user_id } => {
            let id = parse_id("userId", &user_id)?;
            auth.require_self_or_staff(id)?;
            Ok(Topic::Progress(id))
        }
        ClientFrame::SubscribeActivity { course_id } => {
            let id = parse_id("courseId", &course_id)?;
            if auth.role == Role::Student && !st.enrollments.is_enrolled(auth.id, id).await? {
                return Err(AppError::Forbidden);
            }
            Ok(Topic::Activity(id))
        }
    }
}

fn forward(mut rx: broadcast::Receiver<String>, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "websocket subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn session(st: AppState, auth: AuthUser, socket: WebSocket) {
    tracing::debug!(user_id = %auth.id, "websocket connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions: HashMap<Topic, JoinHandle<()>> = HashMap::new();
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let reply = match resolve(&st, &auth, &text).await {
            Ok(topic) => {
                subscriptions
                    .entry(topic)
                    .or_insert_with(|| forward(st.hub.subscribe(topic), tx.clone()));
                frame("subscribed", json!({ "topic": topic_name(topic) }))
            }
            Err(e) => frame("error", json!({ "message": e.to_string() })),
        };
        if tx.send(reply).await.is_err() {
            break;
        }
    }

    for (_, handle) in subscriptions {
        handle.abort();
    }
    drop(tx);
    let _ = writer.await;
    tracing::debug!(user_id = %auth.id, "websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use uuid::Uuid;

    fn as_auth(user: &crate::models::User) -> AuthUser {
        AuthUser {
            id: user.id,
            role: user.role,
        }
    }

    #[tokio::test]
    async fn students_subscribe_to_themselves_only() {
        let env = TestEnv::new();
        let me = env.user("ws1@example.com").await;
        let other = env.user("ws2@example.com").await;
        let auth = as_auth(&me);

        let own = format!(r#"{{"event":"subscribe","data":{{"userId":"{}"}}}}"#, me.id);
        assert_eq!(
            resolve(&env.state, &auth, &own).await.unwrap(),
            Topic::Notifications(me.id)
        );

        let theirs = format!(
            r#"{{"event":"subscribe-progress","data":{{"userId":"{}"}}}}"#,
            other.id
        );
        assert!(matches!(
            resolve(&env.state, &auth, &theirs).await,
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn activity_needs_enrollment_for_students() {
        let env = TestEnv::new();
        let student = env.user("ws3@example.com").await;
        let teacher = env.teacher("wst@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        let text = format!(
            r#"{{"event":"subscribe-activity","data":{{"courseId":"{}"}}}}"#,
            course.id
        );

        assert!(resolve(&env.state, &as_auth(&student), &text).await.is_err());
        assert!(resolve(&env.state, &as_auth(&teacher), &text).await.is_ok());
        env.enroll(&student, &course).await;
        assert_eq!(
            resolve(&env.state, &as_auth(&student), &text).await.unwrap(),
            Topic::Activity(course.id)
        );
    }

    #[tokio::test]
    async fn garbage_frames_are_validation_errors() {
        let env = TestEnv::new();
        let auth = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        for text in ["not json", r#"{"event":"dance","data":{}}"#] {
            assert!(matches!(
                resolve(&env.state, &auth, text).await,
                Err(AppError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn forwarder_relays_hub_events() {
        let env = TestEnv::new();
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = forward(env.hub.subscribe(Topic::Notifications(user)), tx);
        env.hub
            .publish(Topic::Notifications(user), "notification", &json!({"body": "hi"}));
        let got: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(got["event"], "notification");
        handle.abort();
    }
}
