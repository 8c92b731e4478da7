//! API integration tests.

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

mod common;
use common::{request, test_app};

async fn create_game(app: &axum::Router, rounds: i64) -> Value {
    let (status, body) = request(
        app,
        Method::POST,
        "/games",
        Some(json!({
            "hostId": "host",
            "rounds": rounds,
            "scoringRules": {"mode": "marketcap"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn join(app: &axum::Router, session_id: &str, player_id: &str) -> (StatusCode, Value) {
    request(
        app,
        Method::POST,
        &format!("/games/{session_id}/players"),
        Some(json!({"playerId": player_id, "specialization": "trader"})),
    )
    .await
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app().await;
    let (status, body) = request(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_game() {
    let (app, _) = test_app().await;
    let body = create_game(&app, 5).await;

    let session_id = body["sessionId"].as_str().unwrap();
    assert!(session_id.starts_with("game-"));
    let code = body["inviteCode"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(
        code.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    );
    assert_eq!(
        body["connectEndpointHint"],
        format!("ws://localhost:8080/events/{session_id}")
    );
}

#[tokio::test]
async fn test_create_game_rejects_bad_rounds() {
    let (app, _) = test_app().await;

    for rounds in [0, 2, 11, -1] {
        let (status, body) = request(
            &app,
            Method::POST,
            "/games",
            Some(json!({"hostId": "host", "rounds": rounds})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_malformed_body_uses_error_format() {
    let (app, _) = test_app().await;

    let (status, body) = request(&app, Method::POST, "/games", Some(json!({"rounds": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert!(body["error"].as_str().unwrap().contains("hostId"));

    let (status, body) = request(&app, Method::POST, "/games", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_join_until_capacity() {
    let (app, _) = test_app().await;
    let created = create_game(&app, 5).await;
    let id = created["sessionId"].as_str().unwrap();

    for i in 1..=8 {
        let (status, body) = join(&app, id, &format!("p{i}")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["membershipConfirmed"], true);
        assert_eq!(body["playerId"], format!("p{i}"));
    }

    let (status, body) = join(&app, id, "p9").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");

    let (status, view) = request(&app, Method::GET, &format!("/games/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["memberCount"], 8);
    assert_eq!(view["persistedMemberCount"], 8);
    assert_eq!(view["state"], "in_progress");
    assert_eq!(view["members"].as_array().unwrap().len(), 8);
    assert!(view.get("inviteCode").is_none());
}

#[tokio::test]
async fn test_duplicate_join_conflicts() {
    let (app, _) = test_app().await;
    let created = create_game(&app, 5).await;
    let id = created["sessionId"].as_str().unwrap();

    let (status, _) = join(&app, id, "p1").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = join(&app, id, "p1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_JOINED");
}

#[tokio::test]
async fn test_join_unknown_session() {
    let (app, _) = test_app().await;
    let (status, body) = join(&app, "game-missing", "p1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_join_by_invite_code() {
    let (app, _) = test_app().await;
    let created = create_game(&app, 5).await;
    let code = created["inviteCode"].as_str().unwrap().to_lowercase();

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/invite/{code}/players"),
        Some(json!({"playerId": "p1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sessionId"], created["sessionId"]);

    let (status, body) = request(
        &app,
        Method::POST,
        "/games/invite/ZZZZZZ/players",
        Some(json!({"playerId": "p2"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_lifecycle_endpoints() {
    let (app, _) = test_app().await;
    let created = create_game(&app, 3).await;
    let id = created["sessionId"].as_str().unwrap();

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/start"),
        Some(json!({"hostId": "intruder"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_HOST");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/start"),
        Some(json!({"hostId": "host"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "in_progress");

    for round in 1..=3 {
        let (status, body) = request(
            &app,
            Method::POST,
            &format!("/games/{id}/rounds"),
            Some(json!({"hostId": "host"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentRound"], round);
        assert_eq!(body["rounds"], 3);
    }

    let (_, view) = request(&app, Method::GET, &format!("/games/{id}"), None).await;
    assert_eq!(view["state"], "closed");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/end"),
        Some(json!({"hostId": "host"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_abort_and_close_are_terminal() {
    let (app, _) = test_app().await;
    let created = create_game(&app, 3).await;
    let id = created["sessionId"].as_str().unwrap();

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/abort"),
        Some(json!({"hostId": "host"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "closed");

    // Close is idempotent on an already closed session.
    let (status, body) = request(&app, Method::POST, &format!("/games/{id}/close"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "closed");

    let (status, body) = join(&app, id, "late").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_CLOSED");
}

#[tokio::test]
async fn test_publish_scores() {
    let (app, games) = test_app().await;
    let created = create_game(&app, 3).await;
    let id = created["sessionId"].as_str().unwrap();
    join(&app, id, "p1").await;
    let mut live = games.connect(id, "p1").unwrap();

    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/scores"),
        Some(json!({"leaderboard": [{"playerId": "p1", "score": 100}]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let payload = live.receiver.recv().await.unwrap();
    let event: Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(
        event,
        json!({
            "type": "score_update",
            "sessionId": id,
            "leaderboard": [{"playerId": "p1", "score": 100}]
        })
    );

    request(&app, Method::POST, &format!("/games/{id}/close"), None).await;
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/games/{id}/scores"),
        Some(json!({"leaderboard": []})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_CLOSED");
}
