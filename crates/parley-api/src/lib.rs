pub mod conversations;
pub mod error;
pub mod messages;
pub mod reactions;
pub mod read_state;
pub mod state;
pub mod typing;
pub mod users;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use state::AppState;

/// Every REST route. Each write commits through the store and then reports
/// the touched entities to the dispatcher.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(users::upsert_user))
        .route("/users/search", get(users::search_users))
        .route("/users/{identity_key}", get(users::get_user))
        .route("/users/{identity_key}/presence", put(users::set_presence))
        .route("/conversations", get(conversations::list_for_user))
        .route("/conversations/direct", post(conversations::get_or_create_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/typing",
            get(typing::list_typing).put(typing::set_typing),
        )
        .route("/conversations/{conversation_id}/read", post(read_state::mark_read))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use parley_db::Database;
    use parley_gateway::dispatcher::Dispatcher;

    use super::*;
    use crate::state::AppStateInner;

    fn app() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        router(AppStateInner::new(Dispatcher::new(db)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, identity: &str, name: &str) -> Uuid {
        let body = json!({ "identity_key": identity, "name": name, "email": format!("{}@example.com", name) });
        let (status, value) = call(app, "POST", "/users", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(value["user_id"].clone()).unwrap()
    }

    async fn direct(app: &Router, a: Uuid, b: Uuid) -> (StatusCode, Uuid) {
        let (status, value) = call(
            app,
            "POST",
            "/conversations/direct",
            Some(json!({ "user_a": a, "user_b": b })),
        )
        .await;
        (status, serde_json::from_value(value["conversation_id"].clone()).unwrap())
    }

    #[tokio::test]
    async fn user_lookup_and_search() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        register(&app, "idp|bob", "Bob").await;

        let (status, user) = call(&app, "GET", "/users/idp%7Calice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["id"], json!(alice));

        let (status, _) = call(&app, "GET", "/users/idp%7Cnobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, found) = call(&app, "GET", "/users/search?q=b&exclude=idp%7Calice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["name"], "Bob");
    }

    #[tokio::test]
    async fn presence_for_unknown_identity_is_silent() {
        let app = app();
        let (status, _) = call(
            &app,
            "PUT",
            "/users/idp%7Cghost/presence",
            Some(json!({ "is_online": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn direct_conversation_is_reused_in_either_order() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        let bob = register(&app, "idp|bob", "Bob").await;

        let (status, first) = direct(&app, alice, bob).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, second) = direct(&app, bob, alice).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn group_needs_three_members() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        let bob = register(&app, "idp|bob", "Bob").await;

        let (status, body) = call(
            &app,
            "POST",
            "/conversations/group",
            Some(json!({ "participant_ids": [alice, bob], "name": "pair" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn message_lifecycle_over_rest() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        let bob = register(&app, "idp|bob", "Bob").await;
        let (_, conv) = direct(&app, alice, bob).await;

        let (status, created) = call(
            &app,
            "POST",
            &format!("/conversations/{}/messages", conv),
            Some(json!({ "sender_id": alice, "content": "hi bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let message_id = created["message_id"].as_str().unwrap().to_string();

        let (status, list) = call(&app, "GET", &format!("/conversations?user_id={}", bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list[0]["unread_count"], 1);
        assert_eq!(list[0]["last_message"]["preview"], "hi bob");

        let (status, toggled) = call(
            &app,
            "POST",
            &format!("/messages/{}/reactions", message_id),
            Some(json!({ "user_id": bob, "emoji": "👍" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["added"], true);

        // only the sender may delete
        let uri = format!("/messages/{}", message_id);
        let (status, _) = call(&app, "DELETE", &uri, Some(json!({ "requester_id": bob }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, "DELETE", &uri, Some(json!({ "requester_id": alice }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, feed) = call(&app, "GET", &format!("/conversations/{}/messages", conv), None).await;
        assert_eq!(feed[0]["is_deleted"], true);
        assert_eq!(feed[0]["content"], "");
        assert_eq!(feed[0]["sender"]["name"], "Alice");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/conversations/{}/read", conv),
            Some(json!({ "user_id": bob })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, list) = call(&app, "GET", &format!("/conversations?user_id={}", bob), None).await;
        assert_eq!(list[0]["unread_count"], 0);
    }

    #[tokio::test]
    async fn typing_roster_hides_the_viewer() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        let bob = register(&app, "idp|bob", "Bob").await;
        let (_, conv) = direct(&app, alice, bob).await;

        let uri = format!("/conversations/{}/typing", conv);
        let (status, _) = call(&app, "PUT", &uri, Some(json!({ "user_id": alice, "is_typing": true }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, seen_by_bob) = call(&app, "GET", &format!("{}?exclude={}", uri, bob), None).await;
        assert_eq!(seen_by_bob.as_array().unwrap().len(), 1);
        let (_, seen_by_alice) = call(&app, "GET", &format!("{}?exclude={}", uri, alice), None).await;
        assert!(seen_by_alice.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_to_unknown_conversation_is_not_found() {
        let app = app();
        let alice = register(&app, "idp|alice", "Alice").await;
        let (status, _) = call(
            &app,
            "POST",
            &format!("/conversations/{}/messages", Uuid::new_v4()),
            Some(json!({ "sender_id": alice, "content": "hello?" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
