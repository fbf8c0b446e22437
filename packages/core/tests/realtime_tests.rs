//! Integration tests for the realtime chat client
//!
//! This test suite covers:
//! - Inbound frame dispatch (message, typing, message_read, unknown)
//! - Typing expiry and debounce-by-restart
//! - Read receipts (REST authoritative, socket best effort)
//! - Sending through REST regardless of socket state
//! - Conversation selection and stale history responses
//! - Reconnect state machine

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver;
use realtime_core::api::rest::{
    ConversationDto, CreateMessageRequest, CreatedMessage, LastMessageDto, MessageDto, RestApi,
    UploadResponse,
};
use realtime_core::protocol::messages::SenderData;
use realtime_core::protocol::transport::{EventSender, ReadyState, Transport, TransportEvent};
use realtime_core::state::models::{MessageId, UserId};
use realtime_core::{ChatClient, ChatEvent, Config, ConnectionState, MessageKind, RealtimeError, Result, Session};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const ME: UserId = 1;
const T: u64 = 1_000_000;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct TransportLog {
    sent: Vec<String>,
    opened: Vec<String>,
    state: Option<ReadyState>,
    fail_open: bool,
}

/// Транспорт в памяти: открывается синхронно, кадры складываются в лог
#[derive(Clone, Default)]
struct FakeTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl FakeTransport {
    fn sent(&self) -> Vec<serde_json::Value> {
        self.log
            .borrow()
            .sent
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    fn drop_connection(&self) {
        self.log.borrow_mut().state = Some(ReadyState::Closed);
    }
}

impl Transport for FakeTransport {
    fn open(&mut self, url: &str, _events: EventSender) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.opened.push(url.to_string());
        if log.fail_open {
            return Err(RealtimeError::NetworkError("refused".to_string()));
        }
        log.state = Some(ReadyState::Open);
        Ok(())
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.log.borrow_mut().sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.borrow_mut().state = Some(ReadyState::Closed);
        Ok(())
    }

    fn ready_state(&self) -> ReadyState {
        self.log.borrow().state.unwrap_or(ReadyState::Closed)
    }
}

#[derive(Default)]
struct RestLog {
    conversations: Vec<ConversationDto>,
    histories: HashMap<UserId, Vec<MessageDto>>,
    created: Vec<CreateMessageRequest>,
    marked_read: Vec<MessageId>,
    next_id: MessageId,
    fail_create: bool,
    fail_mark_read: bool,
    list_calls: usize,
}

#[derive(Clone, Default)]
struct FakeRest {
    log: Rc<RefCell<RestLog>>,
}

#[async_trait(?Send)]
impl RestApi for FakeRest {
    async fn list_conversations(&self) -> Result<Vec<ConversationDto>> {
        let mut log = self.log.borrow_mut();
        log.list_calls += 1;
        Ok(log.conversations.clone())
    }

    async fn conversation_history(&self, peer_id: UserId) -> Result<Vec<MessageDto>> {
        Ok(self.log.borrow().histories.get(&peer_id).cloned().unwrap_or_default())
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<CreatedMessage> {
        let mut log = self.log.borrow_mut();
        if log.fail_create {
            return Err(RealtimeError::HttpError {
                status: 403,
                message: "Cannot send message to this user".to_string(),
            });
        }
        log.created.push(request.clone());
        log.next_id += 1;
        Ok(CreatedMessage {
            id: 500 + log.next_id,
            created_at: None,
        })
    }

    async fn mark_read(&self, message_id: MessageId) -> Result<()> {
        let mut log = self.log.borrow_mut();
        if log.fail_mark_read {
            return Err(RealtimeError::NetworkError("offline".to_string()));
        }
        log.marked_read.push(message_id);
        Ok(())
    }

    async fn upload_media(&self, file_name: &str, _bytes: Vec<u8>, _mime_type: &str) -> Result<UploadResponse> {
        Ok(UploadResponse {
            file_path: format!("/uploads/image/{}", file_name),
            file_type: Some("image".to_string()),
            mime_type: None,
        })
    }
}

fn user(id: UserId, first_name: &str) -> SenderData {
    SenderData {
        id,
        first_name: first_name.to_string(),
        last_name: "Silva".to_string(),
        avatar: None,
    }
}

fn conversation(peer_id: UserId, unread_count: u32) -> ConversationDto {
    ConversationDto {
        user: user(peer_id, "Peer"),
        last_message: Some(LastMessageDto {
            content: Some("oi".to_string()),
            message_type: MessageKind::Text,
            created_at: None,
            is_read: unread_count == 0,
            is_own: false,
        }),
        unread_count,
    }
}

fn history_message(id: MessageId, sender_id: UserId, is_read: bool) -> MessageDto {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "sender": {"id": sender_id, "first_name": "Peer", "last_name": "Silva"},
        "content": format!("msg {}", id),
        "message_type": "text",
        "is_read": is_read,
        "created_at": "2024-05-01T10:00:00",
    }))
    .unwrap()
}

fn message_frame(id: MessageId, sender_id: UserId) -> TransportEvent {
    TransportEvent::Frame(
        serde_json::json!({
            "type": "message",
            "id": id,
            "sender": {"id": sender_id, "first_name": "Peer", "last_name": "Silva", "avatar": null},
            "content": format!("msg {}", id),
            "message_type": "text",
            "media_url": null,
            "is_read": false,
            "created_at": "2024-05-01T10:00:00.000001",
        })
        .to_string(),
    )
}

fn typing_frame(sender_id: UserId, is_typing: bool) -> TransportEvent {
    TransportEvent::Frame(format!(
        r#"{{"type":"typing","sender_id":{},"is_typing":{}}}"#,
        sender_id, is_typing
    ))
}

struct Harness {
    client: ChatClient<FakeRest, FakeTransport>,
    rest: FakeRest,
    transport: FakeTransport,
    events: UnboundedReceiver<ChatEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let rest = FakeRest::default();
        rest.log.borrow_mut().conversations = vec![conversation(42, 0), conversation(7, 0)];
        let transport = FakeTransport::default();
        let session = Session::new(ME, "Maria Silva", "secret-token").unwrap();

        let mut client = ChatClient::with_config(session, rest.clone(), transport.clone(), &config);
        let events = client.subscribe();
        Self {
            client,
            rest,
            transport,
            events,
        }
    }

    async fn connected() -> Self {
        let mut harness = Self::new();
        harness.client.connect(T).unwrap();
        harness.client.handle_transport_event(TransportEvent::Opened, T).await;
        assert_eq!(harness.client.connection_state(), ConnectionState::Open);
        harness
    }

    fn drain_events(&mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.events.try_next() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[tokio::test]
async fn test_unknown_frame_leaves_state_unchanged() {
    let mut h = Harness::connected().await;
    h.client.refresh_conversations().await.unwrap();
    h.client.select_conversation(42).await.unwrap();
    h.client.handle_transport_event(typing_frame(42, true), T).await;
    h.drain_events();

    let conversations = h.client.conversations().to_vec();
    let messages = h.client.active_messages().to_vec();
    let list_calls = h.rest.log.borrow().list_calls;

    for raw in [
        r#"{"type":"notification","id":1,"title":"Ana"}"#,
        r#"{"type":"friend_request"}"#,
        r#"{"no_type":true}"#,
        "garbage",
    ] {
        h.client.handle_transport_event(TransportEvent::Frame(raw.to_string()), T + 10).await;
    }

    assert_eq!(h.client.conversations(), conversations.as_slice());
    assert_eq!(h.client.active_messages(), messages.as_slice());
    assert_eq!(h.client.typing_peers(T + 10), vec![42]);
    assert_eq!(h.rest.log.borrow().list_calls, list_calls);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_is_own_iff_sender_is_session_user() {
    let mut h = Harness::connected().await;
    h.rest.log.borrow_mut().histories.insert(
        42,
        vec![history_message(1, 42, true), history_message(2, ME, true)],
    );
    h.client.select_conversation(42).await.unwrap();
    h.client.handle_transport_event(message_frame(3, 42), T).await;
    h.client.send_message("hello", MessageKind::Text, None).await.unwrap();

    for message in h.client.active_messages() {
        assert_eq!(message.is_own, message.sender_id == ME, "message {}", message.id);
    }
    assert_eq!(h.client.active_messages().len(), 4);
}

#[tokio::test]
async fn test_inbound_message_for_open_conversation() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();
    let list_calls = h.rest.log.borrow().list_calls;

    h.client.handle_transport_event(message_frame(100, 42), T).await;

    // append -> REST read -> socket receipt -> reconciliation
    let messages = h.client.active_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].is_read);
    assert_eq!(h.rest.log.borrow().marked_read, vec![100]);
    assert_eq!(h.rest.log.borrow().list_calls, list_calls + 1);
    assert!(h
        .transport
        .sent()
        .contains(&serde_json::json!({"type": "message_read", "message_id": 100})));
}

#[tokio::test]
async fn test_two_rapid_messages_keep_arrival_order() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();

    let first = r#"{"type":"message","id":201,"sender":{"id":42,"first_name":"Ana","last_name":""},"content":"a","message_type":"text","is_read":false,"created_at":"2024-05-01T10:00:05"}"#;
    let second = r#"{"type":"message","id":200,"sender":{"id":42,"first_name":"Ana","last_name":""},"content":"b","message_type":"text","is_read":false,"created_at":"2024-05-01T10:00:01"}"#;
    h.client.handle_transport_event(TransportEvent::Frame(first.to_string()), T).await;
    h.client.handle_transport_event(TransportEvent::Frame(second.to_string()), T + 1).await;

    let ids: Vec<_> = h.client.active_messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![201, 200]);
}

#[tokio::test]
async fn test_typing_for_other_peer_while_viewing() {
    let mut h = Harness::connected().await;
    h.client.refresh_conversations().await.unwrap();
    h.client.select_conversation(7).await.unwrap();
    h.drain_events();

    h.client.handle_transport_event(typing_frame(42, true), T).await;

    assert!(h.client.is_peer_typing(42, T + 1));
    assert!(!h.client.is_peer_typing(7, T + 1));
    assert_eq!(h.client.active_peer(), Some(7));
    assert!(h.client.active_messages().is_empty());
    assert_eq!(
        h.drain_events(),
        vec![ChatEvent::TypingChanged {
            peer_id: 42,
            is_typing: true
        }]
    );
}

// ============================================================================
// Typing
// ============================================================================

#[tokio::test]
async fn test_typing_expires_at_three_seconds() {
    let mut h = Harness::connected().await;
    h.client.handle_transport_event(typing_frame(42, true), T).await;
    h.drain_events();

    assert_eq!(h.client.next_deadline(), Some(T + 3000));
    h.client.poll(T + 2999);
    assert!(h.client.is_peer_typing(42, T + 2999));
    assert!(h.drain_events().is_empty());

    h.client.poll(T + 3000);
    assert!(!h.client.is_peer_typing(42, T + 3000));
    assert_eq!(
        h.drain_events(),
        vec![ChatEvent::TypingChanged {
            peer_id: 42,
            is_typing: false
        }]
    );
}

#[tokio::test]
async fn test_typing_restarts_instead_of_accumulating() {
    let mut h = Harness::connected().await;
    h.client.handle_transport_event(typing_frame(42, true), T).await;
    h.client.handle_transport_event(typing_frame(42, true), T + 1000).await;

    h.client.poll(T + 3000);
    assert!(h.client.is_peer_typing(42, T + 3000));
    h.client.poll(T + 3999);
    assert!(h.client.is_peer_typing(42, T + 3999));
    h.client.poll(T + 4000);
    assert!(!h.client.is_peer_typing(42, T + 4000));
}

#[tokio::test]
async fn test_own_typing_is_debounced_and_cleared_on_send() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();

    assert!(h.client.on_input_changed("h", T));
    assert!(!h.client.on_input_changed("he", T + 100));
    assert!(!h.client.on_input_changed("hel", T + 200));
    h.client.send_message("hello", MessageKind::Text, None).await.unwrap();

    let typing: Vec<_> = h
        .transport
        .sent()
        .into_iter()
        .filter(|frame| frame["type"] == "typing")
        .collect();
    assert_eq!(
        typing,
        vec![
            serde_json::json!({"type": "typing", "recipient_id": 42, "is_typing": true}),
            serde_json::json!({"type": "typing", "recipient_id": 42, "is_typing": false}),
        ]
    );
}

#[tokio::test]
async fn test_typing_not_queued_while_offline() {
    let mut h = Harness::new();
    h.client.select_conversation(42).await.unwrap();

    assert!(!h.client.on_input_changed("hi", T));
    h.client.connect(T).unwrap();
    h.client.handle_transport_event(TransportEvent::Opened, T).await;
    assert!(h.transport.sent().is_empty());

    // набор объявляется сразу после подключения, без ожидания refresh
    assert!(h.client.on_input_changed("hi!", T + 100));
    assert_eq!(
        h.transport.sent(),
        vec![serde_json::json!({"type": "typing", "recipient_id": 42, "is_typing": true})]
    );
}

// ============================================================================
// Read receipts
// ============================================================================

#[tokio::test]
async fn test_read_receipt_is_idempotent() {
    let mut h = Harness::connected().await;
    h.rest.log.borrow_mut().conversations = vec![conversation(42, 2)];
    h.rest.log.borrow_mut().fail_mark_read = true;
    h.rest.log.borrow_mut().histories.insert(
        42,
        vec![history_message(1, 42, false), history_message(2, 42, false)],
    );
    h.client.refresh_conversations().await.unwrap();
    h.client.select_conversation(42).await.unwrap();
    assert_eq!(h.client.store().unread_count(42), 2);

    h.rest.log.borrow_mut().fail_mark_read = false;
    assert!(h.client.mark_message_read(1).await);
    assert_eq!(h.client.store().unread_count(42), 1);
    assert!(h.client.mark_message_read(1).await);
    assert_eq!(h.client.store().unread_count(42), 1);
    assert_eq!(h.client.store().conversation(42).unwrap().unread_count, 1);

    // повторное прочтение не доходит ни до REST, ни до сокета
    assert_eq!(h.rest.log.borrow().marked_read, vec![1]);
    let receipts = h
        .transport
        .sent()
        .into_iter()
        .filter(|frame| frame["type"] == "message_read")
        .count();
    assert_eq!(receipts, 1);
}

#[tokio::test]
async fn test_read_receipt_failure_keeps_local_state() {
    let mut h = Harness::connected().await;
    h.rest
        .log
        .borrow_mut()
        .histories
        .insert(42, vec![history_message(1, 42, false)]);
    h.rest.log.borrow_mut().fail_mark_read = true;

    h.client.select_conversation(42).await.unwrap();

    assert!(!h.client.active_messages()[0].is_read);
    assert_eq!(h.client.store().unread_count(42), 1);
    assert!(!h.transport.sent().iter().any(|frame| frame["type"] == "message_read"));
}

#[tokio::test]
async fn test_peer_read_notification_applied_once() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();
    let sent = h.client.send_message("hello", MessageKind::Text, None).await.unwrap();
    h.drain_events();

    let receipt = TransportEvent::Frame(format!(
        r#"{{"type":"message_read","message_id":{},"read_by":42,"read_at":"2024-05-01T10:01:00"}}"#,
        sent.id
    ));
    h.client.handle_transport_event(receipt.clone(), T).await;
    h.client.handle_transport_event(receipt, T + 1).await;

    assert!(h.client.active_messages()[0].is_read);
    assert_eq!(
        h.drain_events(),
        vec![ChatEvent::MessageRead { message_id: sent.id }]
    );
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_while_offline_goes_through_rest() {
    let mut h = Harness::new();
    h.client.select_conversation(42).await.unwrap();
    assert_eq!(h.client.connection_state(), ConnectionState::Closed);

    let message = h.client.send_message("hello", MessageKind::Text, None).await.unwrap();

    assert!(message.is_own);
    assert!(!message.is_read);
    assert_eq!(h.client.active_messages(), &[message]);
    let created = h.rest.log.borrow().created.clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].recipient_id, 42);
    assert_eq!(created[0].content, "hello");
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();
    h.rest.log.borrow_mut().fail_create = true;
    h.drain_events();

    let result = h.client.send_message("hello", MessageKind::Text, None).await;

    assert!(matches!(result, Err(RealtimeError::HttpError { status: 403, .. })));
    assert!(h.client.active_messages().is_empty());
    assert!(matches!(
        h.drain_events().as_slice(),
        [ChatEvent::SendFailed { peer_id: 42, .. }]
    ));
}

#[tokio::test]
async fn test_send_validation() {
    let mut h = Harness::new();
    assert!(matches!(
        h.client.send_message("hello", MessageKind::Text, None).await,
        Err(RealtimeError::InvalidInput(_))
    ));

    h.client.select_conversation(42).await.unwrap();
    assert!(h.client.send_message("   ", MessageKind::Text, None).await.is_err());
    assert!(h.client.send_message("x", MessageKind::Image, None).await.is_err());
    assert!(h.rest.log.borrow().created.is_empty());
}

#[tokio::test]
async fn test_send_media_uploads_then_sends() {
    let mut h = Harness::new();
    h.client.select_conversation(42).await.unwrap();

    let message = h
        .client
        .send_media(MessageKind::Image, "cat.png", vec![1, 2, 3], "image/png")
        .await
        .unwrap();

    assert_eq!(message.media_ref.as_deref(), Some("/uploads/image/cat.png"));
    assert_eq!(message.content, "cat.png");
    assert_eq!(h.rest.log.borrow().created[0].message_type, MessageKind::Image);
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test]
async fn test_stale_history_is_discarded() {
    let mut h = Harness::new();
    h.rest.log.borrow_mut().histories.insert(42, vec![history_message(1, 42, true)]);
    h.rest.log.borrow_mut().histories.insert(7, vec![history_message(2, 7, true)]);

    let first = h.client.begin_selection(42);
    let second = h.client.begin_selection(7);
    let history_7 = h.rest.conversation_history(7).await;
    let history_42 = h.rest.conversation_history(42).await;

    assert!(h.client.finish_selection(second, history_7).await.unwrap());
    assert!(!h.client.finish_selection(first, history_42).await.unwrap());
    assert_eq!(h.client.active_peer(), Some(7));
    assert_eq!(h.client.active_messages()[0].id, 2);
}

#[tokio::test]
async fn test_message_during_history_load_is_kept() {
    let mut h = Harness::connected().await;
    h.rest.log.borrow_mut().histories.insert(42, vec![history_message(1, 42, true)]);

    let ticket = h.client.begin_selection(42);
    let history = h.rest.conversation_history(42).await;
    h.client.handle_transport_event(message_frame(100, 42), T).await;
    assert_eq!(h.rest.log.borrow().marked_read, vec![100]);

    assert!(h.client.finish_selection(ticket, history).await.unwrap());

    let ids: Vec<_> = h.client.active_messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 100]);
    assert!(h.client.active_messages()[1].is_read);
    assert_eq!(h.client.store().unread_count(42), 0);
    assert_eq!(h.rest.log.borrow().marked_read, vec![100]);
}

#[tokio::test]
async fn test_switching_conversation_stops_own_typing() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();
    h.client.on_input_changed("draft", T);

    h.client.select_conversation(7).await.unwrap();

    let sent = h.transport.sent();
    assert_eq!(
        sent.last().unwrap(),
        &serde_json::json!({"type": "typing", "recipient_id": 42, "is_typing": false})
    );
}

#[tokio::test]
async fn test_close_conversation_clears_peer_typing() {
    let mut h = Harness::connected().await;
    h.client.select_conversation(42).await.unwrap();
    h.client.handle_transport_event(typing_frame(42, true), T).await;

    h.client.close_conversation();

    assert_eq!(h.client.active_peer(), None);
    assert!(!h.client.is_peer_typing(42, T + 1));
    assert_eq!(h.client.next_deadline(), Some(T + Config::default().heartbeat_interval_ms));
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_connect_builds_endpoint_and_ignores_repeat() {
    let mut h = Harness::new();
    h.client.connect(T).unwrap();
    h.client.connect(T).unwrap();

    let opened = h.transport.log.borrow().opened.clone();
    assert_eq!(opened, vec!["ws://localhost:8000/ws/1?token=secret-token".to_string()]);
    assert_eq!(
        h.drain_events(),
        vec![ChatEvent::ConnectionChanged {
            state: ConnectionState::Connecting
        }]
    );
}

#[tokio::test]
async fn test_reconnect_backoff_after_drop() {
    let config = Config {
        websocket_retry_initial_ms: 1000,
        websocket_retry_max_ms: 4000,
        websocket_retry_max_attempts: 3,
        ..Config::default()
    };
    let mut h = Harness::with_config(config);
    h.client.connect(T).unwrap();
    h.client.handle_transport_event(TransportEvent::Opened, T).await;

    h.transport.drop_connection();
    h.transport.log.borrow_mut().fail_open = true;
    h.client
        .handle_transport_event(TransportEvent::Closed { code: 1006, reason: String::new() }, T)
        .await;
    assert_eq!(
        h.client.connection_state(),
        ConnectionState::Backoff { attempt: 1, retry_at_ms: T + 1000 }
    );

    h.client.poll(T + 999);
    assert_eq!(h.transport.log.borrow().opened.len(), 1);

    h.client.poll(T + 1000);
    assert_eq!(
        h.client.connection_state(),
        ConnectionState::Backoff { attempt: 2, retry_at_ms: T + 3000 }
    );
    h.client.poll(T + 3000);
    assert_eq!(
        h.client.connection_state(),
        ConnectionState::Backoff { attempt: 3, retry_at_ms: T + 7000 }
    );
    h.client.poll(T + 7000);
    assert_eq!(h.client.connection_state(), ConnectionState::Closed);
    assert_eq!(h.transport.log.borrow().opened.len(), 4);
    assert_eq!(h.client.next_deadline(), None);
}

#[tokio::test]
async fn test_disconnect_disables_reconnect() {
    let mut h = Harness::connected().await;
    h.client.disconnect();
    h.client
        .handle_transport_event(TransportEvent::Closed { code: 1000, reason: String::new() }, T)
        .await;

    assert_eq!(h.client.connection_state(), ConnectionState::Closed);
    h.client.poll(T + 60_000);
    assert_eq!(h.transport.log.borrow().opened.len(), 1);
}

#[tokio::test]
async fn test_close_of_previous_connection_is_ignored() {
    let mut h = Harness::connected().await;
    h.client.disconnect();
    h.client.connect(T + 10).unwrap();
    assert_eq!(h.client.connection_state(), ConnectionState::Connecting);

    // Close старого сокета пришел уже после нового connect()
    h.client
        .handle_transport_event(TransportEvent::Closed { code: 1000, reason: String::new() }, T + 20)
        .await;
    assert_eq!(h.client.connection_state(), ConnectionState::Connecting);

    h.client.handle_transport_event(TransportEvent::Opened, T + 30).await;
    assert_eq!(h.client.connection_state(), ConnectionState::Open);
    assert_eq!(h.client.reconnect_attempts(), 0);
    assert_eq!(h.transport.log.borrow().opened.len(), 2);
}

#[tokio::test]
async fn test_open_event_without_open_socket_is_ignored() {
    let mut h = Harness::new();
    h.client.connect(T).unwrap();
    h.transport.drop_connection();

    h.client.handle_transport_event(TransportEvent::Opened, T).await;
    assert_eq!(h.client.connection_state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn test_heartbeat_sent_when_due() {
    let mut h = Harness::connected().await;
    let interval = Config::default().heartbeat_interval_ms;

    h.client.poll(T + interval - 1);
    assert!(h.transport.sent().is_empty());
    h.client.poll(T + interval);
    assert_eq!(h.transport.sent(), vec![serde_json::json!({"type": "heartbeat"})]);

    h.client
        .handle_transport_event(TransportEvent::Frame(r#"{"type":"pong"}"#.to_string()), T + interval)
        .await;
    assert_eq!(h.client.dispatch_stats().handled, 1);
}

#[tokio::test]
async fn test_process_pending_transport_events() {
    let mut h = Harness::new();
    // FakeTransport не шлет событий сам; проверяем пустую очередь
    assert_eq!(h.client.process_transport_events(T).await, 0);
    assert!(h.client.take_transport_events().is_some());
    assert!(h.client.take_transport_events().is_none());
}

#[tokio::test]
async fn test_shutdown_closes_connection() {
    let mut h = Harness::connected().await;
    h.client.handle_transport_event(typing_frame(42, true), T).await;
    h.drain_events();

    let transport = h.transport.clone();
    h.client.shutdown(T + 10);

    assert_eq!(transport.ready_state(), ReadyState::Closed);
    let mut events = Vec::new();
    while let Ok(Some(event)) = h.events.try_next() {
        events.push(event);
    }
    assert!(events.contains(&ChatEvent::TypingChanged {
        peer_id: 42,
        is_typing: false
    }));
}
