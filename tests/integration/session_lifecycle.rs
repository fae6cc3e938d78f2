//! Model pull lifecycle and status refresh through a running session.

use chatlink::{ConnectionState, ModelLabel, SessionCore, SessionError, SessionEvent};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{
    PushServer, collect_until, drain_events, test_config, unreachable_push_url, wait_for_event,
};

fn is_model_set(e: &SessionEvent) -> bool {
    matches!(e, SessionEvent::ModelSetUpdated { .. })
}

async fn mount_status(backend: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/models/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(backend)
        .await;
}

async fn status_requests(backend: &MockServer) -> usize {
    backend
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/models/status")
        .count()
}

/// Start a session connected to `push`, with the initial status fetch done.
async fn started_session(
    backend: &MockServer,
    push: &mut PushServer,
) -> (SessionCore, tokio::sync::broadcast::Receiver<SessionEvent>) {
    let session = SessionCore::new(test_config(&backend.uri(), &push.url)).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();
    push.wait_connected().await;

    let mut open = false;
    let mut models = false;
    collect_until(&mut events, |e| {
        open |= *e == SessionEvent::TransportStateChanged(ConnectionState::Open);
        models |= is_model_set(e);
        open && models
    })
    .await;
    (session, events)
}

#[tokio::test]
async fn pull_started_then_succeeded_toggles_input_and_refreshes() {
    let backend = MockServer::start().await;
    mount_status(
        &backend,
        json!({"models": [{"name": "mistral", "installed": false}]}),
    )
    .await;
    let mut push = PushServer::start().await;
    let (session, mut events) = started_session(&backend, &mut push).await;
    assert_eq!(status_requests(&backend).await, 1);

    push.push_text("Model mistral is not installed. Pulling it now.");
    let seen = collect_until(&mut events, |e| {
        *e == SessionEvent::InputAvailability { enabled: false }
    })
    .await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::PullStarted { model, .. } if model == "mistral"
    )));
    assert!(!session.input_enabled());
    assert_eq!(session.pull_state().model(), Some("mistral"));

    push.push_text("Successfully pulled model mistral");
    let seen = collect_until(&mut events, is_model_set).await;
    assert!(seen.contains(&SessionEvent::PullResolved {
        model: "mistral".into(),
        success: true,
        text: "Model successfully downloaded and ready to use!".into(),
    }));
    assert!(seen.contains(&SessionEvent::InputAvailability { enabled: true }));
    assert!(session.input_enabled());
    assert!(session.pull_state().is_idle());
    assert!(status_requests(&backend).await >= 2);

    session.shutdown();
}

#[tokio::test]
async fn pull_failure_returns_to_idle() {
    let backend = MockServer::start().await;
    mount_status(&backend, json!({"models": []})).await;
    let mut push = PushServer::start().await;
    let (session, mut events) = started_session(&backend, &mut push).await;

    push.push_text("Model gemma2 is not installed. Pulling it now.");
    push.push_text("Failed to pull model gemma2: pull model manifest: file does not exist");

    let event = wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::PullResolved { .. })
    })
    .await;
    match event {
        SessionEvent::PullResolved {
            model,
            success,
            text,
        } => {
            assert_eq!(model, "gemma2");
            assert!(!success);
            assert!(text.contains("file does not exist"));
        }
        other => unreachable!("expected PullResolved, got {other:?}"),
    }
    wait_for_event(&mut events, |e| {
        *e == SessionEvent::InputAvailability { enabled: true }
    })
    .await;
    assert!(session.pull_state().is_idle());

    session.shutdown();
}

#[tokio::test]
async fn success_while_idle_only_refreshes_status() {
    let backend = MockServer::start().await;
    mount_status(&backend, json!({"models": [{"name": "llama3.1", "installed": true}]})).await;
    let mut push = PushServer::start().await;
    let (session, mut events) = started_session(&backend, &mut push).await;

    push.push_text("Successfully pulled model llama3.1");
    let seen = collect_until(&mut events, is_model_set).await;
    assert!(
        !seen.iter().any(|e| matches!(
            e,
            SessionEvent::PullResolved { .. } | SessionEvent::InputAvailability { .. }
        )),
        "unexpected lifecycle events: {seen:?}"
    );
    assert!(session.input_enabled());
    assert!(status_requests(&backend).await >= 2);

    session.shutdown();
}

#[tokio::test]
async fn status_refresh_replaces_model_set_without_lifecycle_change() {
    let backend = MockServer::start().await;
    mount_status(
        &backend,
        json!({
            "models": [{"name": "llama3.1", "installed": true}],
            "current_model": "llama3.1"
        }),
    )
    .await;

    let session = SessionCore::new(test_config(&backend.uri(), &unreachable_push_url())).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();

    let seen = collect_until(&mut events, is_model_set).await;
    match seen.last() {
        Some(SessionEvent::ModelSetUpdated {
            models,
            backend_model,
        }) => {
            assert_eq!(models.len(), 1);
            assert_eq!(models[0].name, "llama3.1");
            assert!(models[0].installed);
            assert_eq!(backend_model.as_deref(), Some("llama3.1"));
        }
        other => unreachable!("expected ModelSetUpdated, got {other:?}"),
    }
    assert!(!seen.iter().any(|e| matches!(
        e,
        SessionEvent::PullStarted { .. }
            | SessionEvent::PullResolved { .. }
            | SessionEvent::InputAvailability { .. }
    )));
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::ActiveModelLabel { .. })).await,
        SessionEvent::ActiveModelLabel {
            name: "llama3.1".into(),
            label: ModelLabel::Ready,
        }
    );
    assert!(session.pull_state().is_idle());
    assert_eq!(session.models().len(), 1);

    session.shutdown();
}

#[tokio::test]
async fn selecting_missing_model_reports_not_installed() {
    let backend = MockServer::start().await;
    mount_status(
        &backend,
        json!({"models": [
            {"name": "llama3.1", "installed": true},
            {"name": "mistral", "installed": false}
        ]}),
    )
    .await;

    let session = SessionCore::new(test_config(&backend.uri(), &unreachable_push_url())).unwrap();
    session.refresh_status().await.unwrap();

    assert_eq!(session.select_model("mistral").unwrap(), Some(false));
    assert_eq!(session.select_model("llama3.1:latest").unwrap(), Some(true));
    assert_eq!(session.select_model("phi3").unwrap(), None);
    assert_eq!(session.active_model(), "phi3");
}

#[tokio::test]
async fn input_refused_while_pulling() {
    let backend = MockServer::start().await;
    mount_status(&backend, json!({"models": []})).await;
    let mut push = PushServer::start().await;
    let (session, mut events) = started_session(&backend, &mut push).await;

    push.push_text(r#"{"kind":"pull_started","model_name":"phi3","text":"Pulling phi3"}"#);
    wait_for_event(&mut events, |e| {
        *e == SessionEvent::InputAvailability { enabled: false }
    })
    .await;
    drain_events(&mut events);

    let err = session.send_user_message("are you there?").await.unwrap_err();
    assert!(matches!(err, SessionError::PullInProgress(ref m) if m == "phi3"));
    assert!(matches!(
        session.select_model("mistral"),
        Err(SessionError::PullInProgress(_))
    ));
    assert!(drain_events(&mut events).is_empty());
    assert!(push.try_next_frame().is_none());

    session.shutdown();
}

#[tokio::test]
async fn tagged_only_mode_ignores_sentinel_text() {
    let backend = MockServer::start().await;
    mount_status(&backend, json!({"models": []})).await;
    let mut push = PushServer::start().await;

    let mut config = test_config(&backend.uri(), &push.url);
    config.legacy_sentinels = false;
    let session = SessionCore::new(config).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();
    push.wait_connected().await;
    wait_for_event(&mut events, |e| {
        *e == SessionEvent::TransportStateChanged(ConnectionState::Open)
    })
    .await;

    let quoted = "Look for 'Failed to pull model' in the server log.";
    push.push_text(quoted);
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::BotMessage(_))).await,
        SessionEvent::BotMessage(quoted.into())
    );
    assert!(session.input_enabled());

    push.push_text(r#"{"kind":"pull_started","model_name":"mistral","text":"Pulling mistral"}"#);
    wait_for_event(&mut events, |e| {
        *e == SessionEvent::InputAvailability { enabled: false }
    })
    .await;
    assert_eq!(session.pull_state().model(), Some("mistral"));

    session.shutdown();
}
