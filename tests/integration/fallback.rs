//! Fallback delivery while the push channel is down.

use chatlink::transport::DELIVERY_FAILED_REPLY;
use chatlink::{Channel, SessionCore, SessionEvent};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{collect_until, test_config, unreachable_push_url, wait_for_event};

fn is_bot_message(e: &SessionEvent) -> bool {
    matches!(e, SessionEvent::BotMessage(_))
}

#[tokio::test]
async fn server_error_becomes_reply_with_status_code() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(json!({"message": "hi", "model_name": "llama3.1"})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&backend)
        .await;

    let session = SessionCore::new(test_config(&backend.uri(), &unreachable_push_url())).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();

    assert_eq!(
        session.send_user_message("hi").await.unwrap(),
        Channel::Fallback
    );
    match wait_for_event(&mut events, is_bot_message).await {
        SessionEvent::BotMessage(text) => {
            assert!(text.contains("500"), "reply was {text:?}");
        }
        other => unreachable!("expected BotMessage, got {other:?}"),
    }

    session.shutdown();
}

#[tokio::test]
async fn successful_response_becomes_reply() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "Hello from HTTP"})),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let session = SessionCore::new(test_config(&backend.uri(), &unreachable_push_url())).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();

    session.send_user_message("hello").await.unwrap();
    let seen = collect_until(&mut events, is_bot_message).await;

    let echo = seen
        .iter()
        .position(|e| *e == SessionEvent::UserEcho("hello".into()))
        .expect("user echo emitted");
    let typing = seen
        .iter()
        .position(|e| *e == SessionEvent::AwaitingReply { active: true })
        .expect("typing indicator shown");
    let done = seen
        .iter()
        .position(|e| *e == SessionEvent::AwaitingReply { active: false })
        .expect("typing indicator cleared");
    assert!(echo < typing && typing < done);
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::BotMessage("Hello from HTTP".into()))
    );

    session.shutdown();
}

#[tokio::test]
async fn fallback_response_is_classified_like_push_frames() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Model mistral is not installed. Pulling it now, this may take a few minutes..."
        })))
        .mount(&backend)
        .await;

    let mut config = test_config(&backend.uri(), &unreachable_push_url());
    config.default_model = "mistral".into();
    let session = SessionCore::new(config).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();

    session.send_user_message("hi").await.unwrap();
    wait_for_event(&mut events, |e| {
        *e == SessionEvent::InputAvailability { enabled: false }
    })
    .await;
    assert!(!session.input_enabled());
    assert_eq!(session.pull_state().model(), Some("mistral"));

    session.shutdown();
}

#[tokio::test]
async fn unreachable_backend_yields_apology() {
    // Nothing listens on either endpoint.
    let push_url = unreachable_push_url();
    let server_url = push_url
        .replace("ws://", "http://")
        .replace("/api/chat/ws", "");
    let session = SessionCore::new(test_config(&server_url, &push_url)).unwrap();
    let mut events = session.subscribe();
    session.start().unwrap();

    assert_eq!(
        session.send_user_message("anyone?").await.unwrap(),
        Channel::Fallback
    );
    assert_eq!(
        wait_for_event(&mut events, is_bot_message).await,
        SessionEvent::BotMessage(DELIVERY_FAILED_REPLY.into())
    );

    session.shutdown();
}
