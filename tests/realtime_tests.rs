// Integration tests for the realtime wire protocol and connection supervision
//
// Outbound messages must match the JSON shape the endpoint expects; inbound
// parsing must tolerate extra fields and unknown message types.

use serde_json::{json, Value};
use std::time::Duration;
use taskvoice::realtime::{ClientEvent, ConversationItem, ErrorDetail, ServerEvent};
use taskvoice::session::SessionConfig;
use taskvoice::supervisor::{ConnectionError, ReconnectPolicy};

#[test]
fn test_session_update_shape() {
    let event = ClientEvent::SessionUpdate {
        session: SessionConfig::default().session_update(),
    };
    let value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["type"], "session.update");
    assert_eq!(value["session"]["turn_detection"], json!({"type": "server_vad"}));
    assert_eq!(
        value["session"]["input_audio_transcription"],
        json!({"model": "whisper-1", "language": "en"})
    );
    assert_eq!(value["session"]["voice"], "alloy");
    assert!(value["session"]["instructions"]
        .as_str()
        .unwrap()
        .contains("task"));
}

#[test]
fn test_outbound_message_shapes() {
    let append = serde_json::to_value(ClientEvent::InputAudioBufferAppend {
        audio: "AAA=".to_string(),
    })
    .unwrap();
    assert_eq!(append, json!({"type": "input_audio_buffer.append", "audio": "AAA="}));

    let item = serde_json::to_value(ClientEvent::ConversationItemCreate {
        item: ConversationItem::system_text("Task 3 completed"),
    })
    .unwrap();
    assert_eq!(
        item,
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "system",
                "content": [{"type": "input_text", "text": "Task 3 completed"}]
            }
        })
    );

    let response = serde_json::to_value(ClientEvent::ResponseCreate).unwrap();
    assert_eq!(response, json!({"type": "response.create"}));
}

#[test]
fn test_inbound_messages_parse() {
    let parse = |v: Value| serde_json::from_value::<ServerEvent>(v).unwrap();

    assert_eq!(
        parse(json!({"type": "session.created", "event_id": "e1", "session": {}})),
        ServerEvent::SessionCreated
    );
    assert_eq!(
        parse(json!({"type": "response.audio_transcript.delta", "delta": "Hi", "item_id": "x"})),
        ServerEvent::ResponseTranscriptDelta {
            delta: "Hi".to_string()
        }
    );
    assert_eq!(
        parse(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "transcript": "List my tasks",
            "content_index": 0
        })),
        ServerEvent::InputTranscriptionCompleted {
            transcript: "List my tasks".to_string()
        }
    );
    assert_eq!(
        parse(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 10})),
        ServerEvent::SpeechStarted
    );
    assert_eq!(
        parse(json!({"type": "response.output_item.added", "item": {}})),
        ServerEvent::Other
    );
}

#[test]
fn test_error_detail_forms() {
    let object: ServerEvent = serde_json::from_value(json!({
        "type": "error",
        "error": {"type": "invalid_request_error", "code": "session_expired", "message": "Session expired"}
    }))
    .unwrap();
    match object {
        ServerEvent::Error { error } => {
            assert_eq!(
                error.to_string(),
                "invalid_request_error: session_expired: Session expired"
            );
        }
        other => panic!("expected error, got {:?}", other),
    }

    let text: ServerEvent =
        serde_json::from_value(json!({"type": "error", "error": "socket closed"})).unwrap();
    assert_eq!(
        text,
        ServerEvent::Error {
            error: ErrorDetail::Text("socket closed".to_string())
        }
    );

    let bare: ServerEvent = serde_json::from_value(json!({"type": "error", "event_id": "e9"})).unwrap();
    match bare {
        ServerEvent::Error { error } => {
            assert_eq!(error.to_string(), "Unknown error");
            assert!(!ConnectionError::classify(error.to_string()).is_fatal());
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn test_error_classification() {
    let cases = [
        ("network timeout", false),
        ("Temporary failure in name resolution", false),
        ("socket closed by peer", false),
        ("something odd happened", false),
        ("session.error: expired", true),
        ("session_error", true),
        ("Connection-Error: refused", true),
        ("Authentication failed", true),
        ("authentication timeout", true),
    ];

    for (message, fatal) in cases {
        let err = ConnectionError::classify(message);
        assert_eq!(err.is_fatal(), fatal, "{:?}", message);
        assert_eq!(err.stops_capture(), fatal);
        assert_eq!(err.message(), message);
    }
}

#[test]
fn test_recoverable_records_matched_term() {
    match ConnectionError::classify("read timeout") {
        ConnectionError::Recoverable { matched, .. } => assert_eq!(matched, Some("timeout")),
        other => panic!("unexpected {:?}", other),
    }
    match ConnectionError::classify("weird") {
        ConnectionError::Recoverable { matched, .. } => assert_eq!(matched, None),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_reconnect_backoff() {
    let policy = ReconnectPolicy::default();

    assert_eq!(policy.delay(0), None);
    assert_eq!(policy.delay(1), Some(Duration::from_millis(800)));
    assert_eq!(policy.delay(2), Some(Duration::from_millis(1600)));
    assert_eq!(policy.delay(5), Some(Duration::from_millis(12800)));
    assert_eq!(policy.delay(6), None);

    let capped = ReconnectPolicy {
        max_attempts: 10,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(5),
    };
    assert_eq!(capped.delay(4), Some(Duration::from_secs(5)));
}
