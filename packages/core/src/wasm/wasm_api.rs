use futures::channel::mpsc::UnboundedReceiver;
use futures::lock::Mutex;
use futures::StreamExt;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::api::client::ChatClient;
use crate::api::rest::{HttpRestClient, RestApi};
use crate::config::Config;
use crate::protocol::transport::{TransportEvent, WebSocketTransport};
use crate::state::models::{MessageKind, UserId};
use crate::state::session::Session;
use crate::utils::error::RealtimeError;
use crate::utils::logging::init_logging;
use crate::utils::time::now_ms;
use crate::wasm::timer::ScopedTimeout;
use tracing::warn;

type BrowserChatClient = ChatClient<HttpRestClient, WebSocketTransport>;

// Однопоточный контекст WASM: thread_local + Rc.
// Вместо RefCell клиент лежит под async Mutex: операции с REST ждут ответа
// с захваченным клиентом, и параллельный вызов из JS подождет, а не упадет.
struct ClientHandle {
    client: Rc<Mutex<BrowserChatClient>>,
    timer: Rc<RefCell<Option<ScopedTimeout>>>,
}

impl Clone for ClientHandle {
    fn clone(&self) -> Self {
        Self {
            client: Rc::clone(&self.client),
            timer: Rc::clone(&self.timer),
        }
    }
}

thread_local! {
    static CLIENTS: RefCell<HashMap<String, ClientHandle>> = RefCell::new(HashMap::new());
}

type JsResult<T> = Result<T, JsValue>;

fn lookup(client_id: &str) -> Result<ClientHandle, RealtimeError> {
    CLIENTS
        .with(|clients| clients.borrow().get(client_id).cloned())
        .ok_or_else(|| RealtimeError::NotFound(format!("Chat client {} not found", client_id)))
}

fn to_id(value: f64) -> Result<u64, RealtimeError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= 9_007_199_254_740_991.0 {
        Ok(value as u64)
    } else {
        Err(RealtimeError::InvalidInput(format!("invalid id: {}", value)))
    }
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> JsResult<JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(RealtimeError::from)
        .map_err(Into::into)
}

/// Перепланировать `poll` к ближайшему дедлайну клиента
async fn reschedule(client_id: &str) {
    let Ok(handle) = lookup(client_id) else {
        return;
    };
    let deadline = handle.client.lock().await.next_deadline();

    let timer = match deadline {
        Some(deadline) => {
            let id = client_id.to_string();
            let delay = deadline.saturating_sub(now_ms());
            match ScopedTimeout::new(delay, move || spawn_local(poll_client(id))) {
                Ok(timer) => Some(timer),
                Err(e) => {
                    warn!("Failed to schedule poll: {}", e);
                    None
                }
            }
        }
        None => None,
    };
    // Старый таймер снимается при замене
    *handle.timer.borrow_mut() = timer;
}

async fn poll_client(client_id: String) {
    let Ok(handle) = lookup(&client_id) else {
        return;
    };
    handle.client.lock().await.poll(now_ms());
    reschedule(&client_id).await;
}

/// Перекачка событий сокета в клиент; завершается вместе с клиентом
fn spawn_transport_pump(client_id: String, mut events: UnboundedReceiver<TransportEvent>) {
    spawn_local(async move {
        while let Some(event) = events.next().await {
            let Ok(handle) = lookup(&client_id) else {
                break;
            };
            handle
                .client
                .lock()
                .await
                .handle_transport_event(event, now_ms())
                .await;
            reschedule(&client_id).await;
        }
    });
}

#[wasm_bindgen]
pub fn create_chat_client(
    user_id: f64,
    display_name: String,
    auth_token: String,
    api_base_url: Option<String>,
) -> JsResult<String> {
    init_logging();

    let mut config = Config::global().clone();
    if let Some(url) = api_base_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }

    let session = Session::new(to_id(user_id)?, display_name, auth_token)?;
    let rest = HttpRestClient::new(&config, session.auth_token.clone());
    let mut client = ChatClient::with_config(session, rest, WebSocketTransport::new(), &config);

    let client_id = Uuid::new_v4().to_string();
    if let Some(events) = client.take_transport_events() {
        spawn_transport_pump(client_id.clone(), events);
    }

    let handle = ClientHandle {
        client: Rc::new(Mutex::new(client)),
        timer: Rc::new(RefCell::new(None)),
    };
    CLIENTS.with(|clients| {
        clients.borrow_mut().insert(client_id.clone(), handle);
    });
    Ok(client_id)
}

/// Logout: закрыть канал и удалить клиент
#[wasm_bindgen]
pub fn destroy_chat_client(client_id: String) {
    let Some(handle) = CLIENTS.with(|clients| clients.borrow_mut().remove(&client_id)) else {
        return;
    };
    handle.timer.borrow_mut().take();

    match Rc::try_unwrap(handle.client) {
        Ok(client) => client.into_inner().shutdown(now_ms()),
        Err(shared) => spawn_local(async move {
            shared.lock().await.disconnect();
        }),
    }
}

#[wasm_bindgen]
pub async fn chat_on_event(client_id: String, callback: js_sys::Function) -> JsResult<()> {
    let handle = lookup(&client_id)?;
    let mut events = handle.client.lock().await.subscribe();

    spawn_local(async move {
        while let Some(event) = events.next().await {
            match serde_wasm_bindgen::to_value(&event) {
                Ok(value) => {
                    if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                        warn!("Chat event callback failed: {:?}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize chat event: {}", e),
            }
        }
    });
    Ok(())
}

#[wasm_bindgen]
pub async fn chat_connect(client_id: String) -> JsResult<()> {
    let handle = lookup(&client_id)?;
    handle.client.lock().await.connect(now_ms())?;
    reschedule(&client_id).await;
    Ok(())
}

#[wasm_bindgen]
pub async fn chat_disconnect(client_id: String) -> JsResult<()> {
    let handle = lookup(&client_id)?;
    handle.client.lock().await.disconnect();
    reschedule(&client_id).await;
    Ok(())
}

#[wasm_bindgen]
pub async fn chat_state(client_id: String) -> JsResult<JsValue> {
    let handle = lookup(&client_id)?;
    let state = handle.client.lock().await.connection_state();
    to_js(&state)
}

#[wasm_bindgen]
pub async fn chat_list_conversations(client_id: String) -> JsResult<JsValue> {
    let handle = lookup(&client_id)?;
    let mut client = handle.client.lock().await;
    let conversations = client.list_conversations().await?;
    to_js(conversations)
}

/// Открыть беседу и вернуть ее историю
///
/// История грузится без захвата клиента: если за это время пользователь
/// выбрал другую беседу, ответ отбрасывается.
#[wasm_bindgen]
pub async fn chat_select_conversation(client_id: String, peer_id: f64) -> JsResult<JsValue> {
    let peer_id: UserId = to_id(peer_id)?;
    let handle = lookup(&client_id)?;

    let (ticket, rest) = {
        let mut client = handle.client.lock().await;
        (client.begin_selection(peer_id), client.rest().clone())
    };
    let history = rest.conversation_history(peer_id).await;

    let mut client = handle.client.lock().await;
    client.finish_selection(ticket, history).await?;
    to_js(client.active_messages())
}

#[wasm_bindgen]
pub async fn chat_close_conversation(client_id: String) -> JsResult<()> {
    let handle = lookup(&client_id)?;
    handle.client.lock().await.close_conversation();
    Ok(())
}

#[wasm_bindgen]
pub async fn chat_messages(client_id: String) -> JsResult<JsValue> {
    let handle = lookup(&client_id)?;
    let client = handle.client.lock().await;
    to_js(client.active_messages())
}

#[wasm_bindgen]
pub async fn chat_send_message(
    client_id: String,
    content: String,
    message_type: Option<String>,
    media_url: Option<String>,
) -> JsResult<JsValue> {
    let kind = match message_type {
        Some(raw) => raw.parse::<MessageKind>()?,
        None => MessageKind::Text,
    };
    let handle = lookup(&client_id)?;
    let message = handle
        .client
        .lock()
        .await
        .send_message(&content, kind, media_url)
        .await?;
    to_js(&message)
}

#[wasm_bindgen]
pub async fn chat_send_media(
    client_id: String,
    message_type: String,
    file_name: String,
    bytes: Vec<u8>,
    mime_type: String,
) -> JsResult<JsValue> {
    let kind = message_type.parse::<MessageKind>()?;
    let handle = lookup(&client_id)?;
    let message = handle
        .client
        .lock()
        .await
        .send_media(kind, &file_name, bytes, &mime_type)
        .await?;
    to_js(&message)
}

#[wasm_bindgen]
pub async fn chat_input_changed(client_id: String, content: String) -> JsResult<bool> {
    let handle = lookup(&client_id)?;
    let sent = handle.client.lock().await.on_input_changed(&content, now_ms());
    Ok(sent)
}

#[wasm_bindgen]
pub async fn chat_mark_read(client_id: String, message_id: f64) -> JsResult<bool> {
    let message_id = to_id(message_id)?;
    let handle = lookup(&client_id)?;
    let confirmed = handle.client.lock().await.mark_message_read(message_id).await;
    Ok(confirmed)
}

#[wasm_bindgen]
pub async fn chat_is_peer_typing(client_id: String, peer_id: f64) -> JsResult<bool> {
    let peer_id = to_id(peer_id)?;
    let handle = lookup(&client_id)?;
    let typing = handle.client.lock().await.is_peer_typing(peer_id, now_ms());
    Ok(typing)
}

#[wasm_bindgen]
pub async fn chat_reconnect_attempts(client_id: String) -> JsResult<u32> {
    let handle = lookup(&client_id)?;
    let attempts = handle.client.lock().await.reconnect_attempts();
    Ok(attempts)
}
