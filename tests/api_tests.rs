mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use base64::Engine;
use serde_json::{json, Value};

use common::{call, test_context, test_context_with, test_db, test_config, MockGenerator, TestContext};
use lingo_backend::services::audio::{pcm16_to_wav, INPUT_SAMPLE_RATE};
use lingo_backend::state::AppState;

fn profile_body(username: &str) -> Value {
    json!({
        "username": username,
        "displayName": "Ana",
        "currentLevel": "A2",
        "targetLevel": "B1",
        "interests": ["travel", " travel ", "cooking"]
    })
}

async fn onboard(ctx: &TestContext, username: &str) {
    let (status, _) = call(ctx.app(), "POST", "/api/profiles", Some(profile_body(username))).await;
    assert_eq!(status, StatusCode::OK);
}

/// Onboards, builds the course, opens the first module and returns the
/// module id plus its lesson ids.
async fn open_first_module(ctx: &TestContext, username: &str) -> (String, Vec<String>) {
    onboard(ctx, username).await;
    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/{username}/course"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let module_id = body["data"]["course"]["modules"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/{username}/modules/{module_id}/open"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let lessons = body["data"]["module"]["lessons"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["id"].as_str().unwrap().to_string())
        .collect();
    (module_id, lessons)
}

fn scramble_order(pool: &Value, sentence: &str) -> Vec<usize> {
    let pool: Vec<&str> = pool
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w.as_str().unwrap())
        .collect();
    sentence
        .split_whitespace()
        .map(|word| pool.iter().position(|p| *p == word).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_reports_database() {
    let ctx = test_context().await;
    let (status, body) = call(ctx.app(), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["aiConfigured"], false);

    let (status, body) = call(ctx.app(), "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let ctx = test_context().await;
    let (status, body) = call(ctx.app(), "GET", "/api/nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_profile_upsert_and_get() {
    let ctx = test_context().await;
    let (status, body) = call(ctx.app(), "POST", "/api/profiles", Some(profile_body("ana"))).await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["username"], "ana");
    assert_eq!(data["level"], 1);
    assert_eq!(data["totalXp"], 0);
    assert_eq!(data["interests"], json!(["travel", "cooking"]));
    assert_eq!(data["streakStatus"], "noActivity");
    assert_eq!(data["nextLevelXp"], 100);
    let id = data["id"].clone();

    let mut update = profile_body("ana");
    update["targetLevel"] = json!("C1");
    let (_, body) = call(ctx.app(), "POST", "/api/profiles", Some(update)).await;
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["targetLevel"], "C1");

    let (status, body) = call(ctx.app(), "GET", "/api/profiles/ana", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["targetLevel"], "C1");
}

#[tokio::test]
async fn test_profile_validation() {
    let ctx = test_context().await;

    let mut bad = profile_body("ana");
    bad["username"] = json!("  ");
    let (status, body) = call(ctx.app(), "POST", "/api/profiles", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let mut bad = profile_body("ana");
    bad["username"] = json!("ana/../etc");
    let (status, _) = call(ctx.app(), "POST", "/api/profiles", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(ctx.app(), "GET", "/api/profiles/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_profile() {
    let ctx = test_context().await;
    onboard(&ctx, "ana").await;

    let (status, _) = call(ctx.app(), "DELETE", "/api/profiles/ana", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(ctx.app(), "DELETE", "/api/profiles/ana", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_course_is_generated_once() {
    let ctx = test_context().await;
    onboard(&ctx, "ana").await;

    let (status, body) = call(ctx.app(), "GET", "/api/profiles/ana/course", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (_, first) = call(ctx.app(), "POST", "/api/profiles/ana/course", None).await;
    assert_eq!(first["data"]["outcome"], "generated");
    assert_eq!(first["data"]["course"]["modules"].as_array().unwrap().len(), 2);

    let (_, second) = call(ctx.app(), "POST", "/api/profiles/ana/course", None).await;
    assert_eq!(second["data"]["outcome"], "cached");
    assert_eq!(
        first["data"]["course"]["modules"][0]["id"],
        second["data"]["course"]["modules"][0]["id"]
    );
    assert_eq!(ctx.generator.syllabus_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_open_module_and_lesson() {
    let ctx = test_context().await;
    let (module_id, lessons) = open_first_module(&ctx, "ana").await;
    assert_eq!(lessons.len(), 2);

    let (_, again) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/modules/{module_id}/open"),
        None,
    )
    .await;
    assert_eq!(again["data"]["outcome"], "cached");
    assert_eq!(ctx.generator.module_calls.load(Ordering::SeqCst), 1);

    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{}/open", lessons[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "generated");
    assert_eq!(body["data"]["moduleId"], module_id.as_str());
    assert_eq!(body["data"]["prefetching"], lessons[1].as_str());
    assert!(body["data"]["lesson"]["content"]["scenario"].is_string());

    let (_, cached) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{}/open", lessons[0]),
        None,
    )
    .await;
    assert_eq!(cached["data"]["outcome"], "cached");
}

#[tokio::test]
async fn test_open_unknown_module_is_404() {
    let ctx = test_context().await;
    onboard(&ctx, "ana").await;

    let (status, _) = call(ctx.app(), "POST", "/api/profiles/ana/modules/missing/open", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(ctx.app(), "POST", "/api/profiles/ana/course", None).await;
    let (status, _) = call(ctx.app(), "POST", "/api/profiles/ana/modules/missing/open", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_lesson_generation_blocks_runs() {
    let ctx = test_context().await;
    let (_, lessons) = open_first_module(&ctx, "ana").await;
    ctx.generator.fail_content.store(true, Ordering::SeqCst);

    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{}/open", lessons[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "GENERATION_FAILED");

    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{}/runs", lessons[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_slow_lesson_generation_times_out() {
    let ctx = test_context_with(MockGenerator::with_content_delay(Duration::from_secs(2))).await;
    let (_, lessons) = open_first_module(&ctx, "ana").await;

    let (status, body) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{}/open", lessons[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "GENERATION_TIMEOUT");
}

#[tokio::test]
async fn test_concurrent_open_reports_in_progress() {
    let ctx = test_context_with(MockGenerator::with_content_delay(Duration::from_millis(300))).await;
    let (_, lessons) = open_first_module(&ctx, "ana").await;
    let uri = format!("/api/profiles/ana/lessons/{}/open", lessons[0]);

    let (first, second) = tokio::join!(
        call(ctx.app(), "POST", &uri, None),
        call(ctx.app(), "POST", &uri, None)
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn test_lesson_run_to_completion_awards_xp() {
    let ctx = test_context().await;
    let (module_id, lessons) = open_first_module(&ctx, "ana").await;
    let lesson_id = &lessons[0];
    call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{lesson_id}/open"),
        None,
    )
    .await;

    let (status, run) = call(
        ctx.app(),
        "POST",
        &format!("/api/profiles/ana/lessons/{lesson_id}/runs"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let run = &run["data"];
    assert_eq!(run["current"], "scenario");
    assert_eq!(run["moduleId"], module_id.as_str());
    let run_id = run["id"].as_str().unwrap().to_string();
    let submit = format!("/api/runs/{run_id}/submit");

    for stage in ["scenario", "vocabulary"] {
        let (status, body) = call(ctx.app(), "POST", &submit, Some(json!({ "stage": stage }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["advanced"], true);
    }

    // Skipping ahead is rejected.
    let (status, body) = call(ctx.app(), "POST", &submit, Some(json!({ "stage": "quiz", "answers": [0] }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "STAGE_REJECTED");

    let (_, wrong) = call(
        ctx.app(),
        "POST",
        &submit,
        Some(json!({ "stage": "fillInBlank", "answers": [1] })),
    )
    .await;
    assert_eq!(wrong["data"]["advanced"], false);
    assert_eq!(wrong["data"]["current"], "fillInBlank");

    let (_, right) = call(
        ctx.app(),
        "POST",
        &submit,
        Some(json!({ "stage": "fillInBlank", "answers": [0] })),
    )
    .await;
    assert_eq!(right["data"]["advanced"], true);
    assert_eq!(right["data"]["current"], "scramble");

    let order = scramble_order(&run["scramblePool"], "I want to improve my English");
    let (_, scramble) = call(
        ctx.app(),
        "POST",
        &submit,
        Some(json!({ "stage": "scramble", "order": order })),
    )
    .await;
    assert_eq!(scramble["data"]["detail"]["result"], "correct");
    assert_eq!(scramble["data"]["current"], "quiz");

    let (_, quiz) = call(ctx.app(), "POST", &submit, Some(json!({ "stage": "quiz", "answers": [0] }))).await;
    assert_eq!(quiz["data"]["detail"]["report"]["score"], 100);
    assert_eq!(quiz["data"]["current"], "pronunciation");

    let wav = pcm16_to_wav(&[0, 0, 16, 0, 32, 0], INPUT_SAMPLE_RATE).unwrap();
    let audio = base64::engine::general_purpose::STANDARD.encode(wav);
    let (status, spoken) = call(
        ctx.app(),
        "POST",
        &format!("/api/runs/{run_id}/pronunciation"),
        Some(json!({ "line": 0, "audio": audio })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spoken["data"]["bestScore"], 60);

    let (status, done) = call(ctx.app(), "POST", &submit, Some(json!({ "stage": "pronunciation" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["data"]["current"], "completion");
    let completion = &done["data"]["completion"];
    assert_eq!(completion["score"], 60);
    assert_eq!(completion["firstCompletion"], true);
    assert_eq!(completion["moduleCompleted"], false);
    assert_eq!(completion["xp"]["awarded"], 80);
    assert_eq!(completion["streak"]["transition"], "started");

    // The finished run is gone; progress is persisted.
    let (status, _) = call(ctx.app(), "GET", &format!("/api/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, profile) = call(ctx.app(), "GET", "/api/profiles/ana", None).await;
    assert_eq!(profile["data"]["totalXp"], 80);
    assert_eq!(profile["data"]["streak"], 1);
    assert_eq!(profile["data"]["streakStatus"], "active");

    let (_, course) = call(ctx.app(), "GET", "/api/profiles/ana/course", None).await;
    let lesson = &course["data"]["modules"][0]["lessons"][0];
    assert_eq!(lesson["completed"], true);
    assert_eq!(lesson["score"], 60);
}

#[tokio::test]
async fn test_reveal_skips_stage_with_zero_score() {
    let ctx = test_context().await;
    let (_, lessons) = open_first_module(&ctx, "ana").await;
    let lesson_id = &lessons[0];
    call(ctx.app(), "POST", &format!("/api/profiles/ana/lessons/{lesson_id}/open"), None).await;
    let (_, run) = call(ctx.app(), "POST", &format!("/api/profiles/ana/lessons/{lesson_id}/runs"), None).await;
    let run_id = run["data"]["id"].as_str().unwrap().to_string();
    let reveal = format!("/api/runs/{run_id}/reveal");

    let mut last = Value::Null;
    for _ in 0..6 {
        let (status, body) = call(ctx.app(), "POST", &reveal, None).await;
        assert_eq!(status, StatusCode::OK);
        last = body;
    }
    assert_eq!(last["data"]["stage"], "pronunciation");
    assert_eq!(last["data"]["current"], "completion");
    assert_eq!(last["data"]["completion"]["score"], 0);
    assert_eq!(last["data"]["completion"]["xp"]["awarded"], 50);
}

#[tokio::test]
async fn test_abandoned_pronunciation_can_be_retried() {
    let ctx = test_context().await;
    let (_, lessons) = open_first_module(&ctx, "ana").await;
    let lesson_id = &lessons[0];
    call(ctx.app(), "POST", &format!("/api/profiles/ana/lessons/{lesson_id}/open"), None).await;
    let (_, run) = call(ctx.app(), "POST", &format!("/api/profiles/ana/lessons/{lesson_id}/runs"), None).await;
    let run_id = run["data"]["id"].as_str().unwrap().to_string();
    for _ in 0..5 {
        call(ctx.app(), "POST", &format!("/api/runs/{run_id}/reveal"), None).await;
    }

    let wav = pcm16_to_wav(&[0, 0, 16, 0], INPUT_SAMPLE_RATE).unwrap();
    let body = json!({
        "line": 0,
        "audio": base64::engine::general_purpose::STANDARD.encode(wav),
    });
    let uri = format!("/api/runs/{run_id}/pronunciation");

    // The client gives up while the provider is still scoring.
    ctx.generator.slow_evaluation.store(true, Ordering::SeqCst);
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        call(ctx.app(), "POST", &uri, Some(body.clone())),
    )
    .await;
    assert!(abandoned.is_err());

    ctx.generator.slow_evaluation.store(false, Ordering::SeqCst);
    let (status, spoken) = call(ctx.app(), "POST", &uri, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spoken["data"]["bestScore"], 60);
}

#[tokio::test]
async fn test_racing_module_opens_generate_lessons_once() {
    let ctx = test_context_with(MockGenerator::with_module_delay(Duration::from_millis(200))).await;
    onboard(&ctx, "ana").await;
    let (_, body) = call(ctx.app(), "POST", "/api/profiles/ana/course", None).await;
    let module_id = body["data"]["course"]["modules"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/profiles/ana/modules/{module_id}/open");

    let (a, b, c) = tokio::join!(
        call(ctx.app(), "POST", &uri, None),
        call(ctx.app(), "POST", &uri, None),
        call(ctx.app(), "POST", &uri, None)
    );
    let statuses = [a.0, b.0, c.0];
    assert!(statuses
        .iter()
        .all(|s| *s == StatusCode::OK || *s == StatusCode::CONFLICT));
    assert!(statuses.contains(&StatusCode::OK));

    let (status, again) = call(ctx.app(), "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["data"]["outcome"], "cached");
    assert_eq!(again["data"]["module"]["lessons"].as_array().unwrap().len(), 2);
    assert_eq!(ctx.generator.module_calls.load(Ordering::SeqCst), 1);

    let proxy = ctx.state.db_proxy();
    let stored: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "lessons" WHERE "moduleId" = ?"#)
        .bind(&module_id)
        .fetch_one(proxy.pool())
        .await
        .unwrap();
    assert_eq!(stored, 2);
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let ctx = test_context().await;
    let (status, _) = call(ctx.app(), "GET", "/api/runs/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        ctx.app(),
        "POST",
        "/api/runs/nope/submit",
        Some(json!({ "stage": "scenario" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_speech_and_analysis() {
    let ctx = test_context().await;
    onboard(&ctx, "ana").await;

    let (status, body) = call(ctx.app(), "POST", "/api/speech", Some(json!({ "text": "Hello there" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["format"], "wav");
    let wav = base64::engine::general_purpose::STANDARD
        .decode(body["data"]["audio"].as_str().unwrap())
        .unwrap();
    assert_eq!(&wav[..4], b"RIFF");

    let (status, _) = call(ctx.app(), "POST", "/api/speech", Some(json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        ctx.app(),
        "POST",
        "/api/profiles/ana/analysis",
        Some(json!({ "transcript": [
            { "role": "tutor", "text": "Where did you go?" },
            { "role": "learner", "text": "I go yesterday to the park" },
            { "role": "learner", "text": "  " }
        ] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["score"], 75);
    assert_eq!(body["data"]["summary"], "2 turns analysed");

    let (status, _) = call(
        ctx.app(),
        "POST",
        "/api/profiles/ana/analysis",
        Some(json!({ "transcript": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_credential_surfaces_as_503() {
    let (proxy, _dir) = test_db().await;
    let config = test_config(proxy.url());
    let app = lingo_backend::create_app(AppState::from_config(config, proxy));

    let (status, _) = call(app.clone(), "POST", "/api/profiles", Some(profile_body("ana"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(app.clone(), "POST", "/api/profiles/ana/course", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "AI_NOT_CONFIGURED");

    let (status, _) = call(app, "POST", "/api/speech", Some(json!({ "text": "hi" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
