// Чат-клиент: связывает REST, realtime канал и состояние бесед
//
// Время передается снаружи (`now_ms`): клиент не держит таймеров, а хозяин
// event loop'а вызывает `poll` к моменту `next_deadline`.

use crate::api::rest::{CreateMessageRequest, MessageDto, RestApi};
use crate::config::Config;
use crate::protocol::transport::{Transport, TransportEvent};
use crate::realtime::commands::{send_heartbeat, send_read_receipt, send_typing};
use crate::realtime::connection::{ConnectionManager, ConnectionState};
use crate::realtime::dispatcher::{DispatchContext, DispatchStats, Dispatcher, Effect};
use crate::realtime::typing::{TypingDebouncer, TypingTracker};
use crate::state::conversations::{ConversationStore, SelectionTicket};
use crate::state::events::{ChatEvent, EventBus};
use crate::state::models::{Conversation, Message, MessageId, MessageKind, UserId};
use crate::state::session::Session;
use crate::utils::error::{RealtimeError, Result};
use chrono::Utc;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use tracing::{debug, info, warn};

/// Клиент одной сессии
pub struct ChatClient<R: RestApi, T: Transport> {
    session: Session,
    rest: R,
    connection: ConnectionManager<T>,
    transport_events: Option<UnboundedReceiver<TransportEvent>>,
    store: ConversationStore,
    typing: TypingTracker,
    debouncer: TypingDebouncer,
    dispatcher: Dispatcher,
    events: EventBus,
}

impl<R: RestApi, T: Transport> ChatClient<R, T> {
    /// Создать клиент с глобальной конфигурацией
    pub fn new(session: Session, rest: R, transport: T) -> Self {
        Self::with_config(session, rest, transport, Config::global())
    }

    pub fn with_config(session: Session, rest: R, transport: T, config: &Config) -> Self {
        let (tx, rx) = unbounded();
        Self {
            session,
            rest,
            connection: ConnectionManager::new(transport, tx, config),
            transport_events: Some(rx),
            store: ConversationStore::new(),
            typing: TypingTracker::new(config.typing_expiry_ms),
            debouncer: TypingDebouncer::new(config.typing_refresh_ms),
            dispatcher: Dispatcher::new(),
            events: EventBus::new(),
        }
    }

    /// Подписаться на изменения состояния
    pub fn subscribe(&mut self) -> UnboundedReceiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Забрать поток событий транспорта, чтобы обрабатывать его снаружи
    ///
    /// После этого `process_transport_events` ничего не делает.
    pub fn take_transport_events(&mut self) -> Option<UnboundedReceiver<TransportEvent>> {
        self.transport_events.take()
    }

    // === Соединение ===

    /// Открыть realtime канал
    ///
    /// Ошибка транспорта не возвращается: она залогирована, дальше решает
    /// backoff. Ошибкой считается только некорректный адрес.
    pub fn connect(&mut self, now_ms: u64) -> Result<()> {
        let before = self.connection.state();
        let result = self
            .connection
            .connect(self.session.user_id, &self.session.auth_token, now_ms);
        self.publish_state_change(before);

        match result {
            Err(e @ RealtimeError::InvalidInput(_)) => Err(e),
            _ => Ok(()),
        }
    }

    pub fn disconnect(&mut self) {
        let before = self.connection.state();
        self.connection.disconnect();
        self.publish_state_change(before);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Обслужить дедлайны: переподключение, истечение "печатает", heartbeat
    pub fn poll(&mut self, now_ms: u64) {
        let before = self.connection.state();
        if self.connection.poll_reconnect(now_ms) {
            self.publish_state_change(before);
        }

        for peer_id in self.typing.expire_due(now_ms) {
            debug!(peer_id, "Typing indicator expired");
            self.events.publish(ChatEvent::TypingChanged {
                peer_id,
                is_typing: false,
            });
        }

        if self.connection.heartbeat_due(now_ms) {
            send_heartbeat(&self.connection);
            self.connection.mark_heartbeat(now_ms);
        }
    }

    /// Когда в следующий раз нужен `poll`
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.connection.next_deadline(), self.typing.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Применить событие транспорта
    pub async fn handle_transport_event(&mut self, event: TransportEvent, now_ms: u64) {
        let before = self.connection.state();
        if self.connection.on_event(&event, now_ms) {
            self.publish_state_change(before);
        }

        if let TransportEvent::Frame(raw) = event {
            let ctx = DispatchContext {
                store: &mut self.store,
                typing: &mut self.typing,
                events: &mut self.events,
                session_user_id: self.session.user_id,
                now_ms,
            };
            let effects = self.dispatcher.dispatch(&raw, ctx);
            self.run_effects(effects).await;
        }
    }

    /// Обработать все накопленные события транспорта. Возвращает их количество.
    pub async fn process_transport_events(&mut self, now_ms: u64) -> usize {
        let mut pending = Vec::new();
        if let Some(rx) = self.transport_events.as_mut() {
            while let Ok(Some(event)) = rx.try_next() {
                pending.push(event);
            }
        }

        let count = pending.len();
        for event in pending {
            self.handle_transport_event(event, now_ms).await;
        }
        count
    }

    async fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::MarkRead(message_id) => {
                    self.mark_message_read(message_id).await;
                }
                Effect::RefreshConversations => {
                    if let Err(e) = self.refresh_conversations().await {
                        warn!("Failed to refresh conversations: {}", e);
                    }
                }
            }
        }
    }

    fn publish_state_change(&mut self, before: ConnectionState) {
        let state = self.connection.state();
        if state != before {
            self.events.publish(ChatEvent::ConnectionChanged { state });
        }
    }

    // === Беседы ===

    /// Перезагрузить список бесед с сервера
    pub async fn refresh_conversations(&mut self) -> Result<()> {
        let dtos = self.rest.list_conversations().await?;
        let conversations = dtos.into_iter().map(Conversation::from).collect();
        self.store.replace_conversations(conversations);
        self.events.publish(ChatEvent::ConversationsUpdated);
        Ok(())
    }

    pub async fn list_conversations(&mut self) -> Result<&[Conversation]> {
        self.refresh_conversations().await?;
        Ok(self.store.conversations())
    }

    /// Открыть беседу: загрузить историю и подтвердить непрочитанные
    pub async fn select_conversation(&mut self, peer_id: UserId) -> Result<bool> {
        let ticket = self.begin_selection(peer_id);
        let history = self.rest.conversation_history(peer_id).await;
        self.finish_selection(ticket, history).await
    }

    /// Первая половина `select_conversation`: беседа открыта, история пуста
    ///
    /// Позволяет загрузить историю без блокировки клиента; ответ применяется
    /// через `finish_selection` и отбрасывается, если выбор уже сменился.
    pub fn begin_selection(&mut self, peer_id: UserId) -> SelectionTicket {
        if let Some(previous) = self.store.active_peer() {
            if previous != peer_id {
                self.stop_own_typing(previous);
            }
        }
        self.store.begin_selection(peer_id)
    }

    /// Применить загруженную историю. `Ok(false)` - ответ устарел.
    pub async fn finish_selection(
        &mut self,
        ticket: SelectionTicket,
        history: Result<Vec<MessageDto>>,
    ) -> Result<bool> {
        let history = history?;
        let user_id = self.session.user_id;
        let messages = history.into_iter().map(|dto| dto.into_message(user_id)).collect();

        if !self.store.apply_history(ticket, messages) {
            return Ok(false);
        }
        self.events.publish(ChatEvent::HistoryLoaded {
            peer_id: ticket.peer_id,
        });

        for message_id in self.store.unread_inbound_ids() {
            self.mark_message_read(message_id).await;
        }
        Ok(true)
    }

    pub fn close_conversation(&mut self) {
        let Some(peer_id) = self.store.active_peer() else {
            return;
        };
        self.stop_own_typing(peer_id);
        self.store.close_conversation();
        if self.typing.forget(peer_id) {
            self.events.publish(ChatEvent::TypingChanged {
                peer_id,
                is_typing: false,
            });
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.store.conversations()
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.store.active_peer()
    }

    pub fn active_messages(&self) -> &[Message] {
        self.store.active_messages()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    // === Сообщения ===

    /// Отправить сообщение в открытую беседу
    ///
    /// Идет через REST независимо от состояния сокета.
    pub async fn send_message(
        &mut self,
        content: &str,
        kind: MessageKind,
        media_ref: Option<String>,
    ) -> Result<Message> {
        let peer_id = self
            .store
            .active_peer()
            .ok_or_else(|| RealtimeError::InvalidInput("no conversation selected".to_string()))?;

        if content.trim().is_empty() && media_ref.is_none() {
            return Err(RealtimeError::InvalidInput("message is empty".to_string()));
        }
        if kind.is_media() && media_ref.is_none() {
            return Err(RealtimeError::InvalidInput(format!(
                "{} message requires media",
                kind.as_str()
            )));
        }

        let request = CreateMessageRequest {
            recipient_id: peer_id,
            content: content.to_string(),
            message_type: kind,
            media_url: media_ref.clone(),
        };
        let created = match self.rest.create_message(&request).await {
            Ok(created) => created,
            Err(e) => {
                warn!(peer_id, "Failed to send message: {}", e);
                self.events.publish(ChatEvent::SendFailed {
                    peer_id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let message = Message {
            id: created.id,
            sender_id: self.session.user_id,
            sender_name: self.session.display_name.clone(),
            content: request.content,
            kind,
            media_ref,
            is_read: false,
            created_at: created.created_at.unwrap_or_else(Utc::now),
            is_own: true,
        };

        if self.store.append_outgoing(peer_id, message.clone()) {
            self.events.publish(ChatEvent::MessageAppended {
                peer_id,
                message_id: message.id,
            });
        }
        self.stop_own_typing(peer_id);

        if let Err(e) = self.refresh_conversations().await {
            warn!("Failed to refresh conversations after send: {}", e);
        }
        Ok(message)
    }

    /// Загрузить файл и отправить его сообщением
    pub async fn send_media(
        &mut self,
        kind: MessageKind,
        file_name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Message> {
        let peer_id = self
            .store
            .active_peer()
            .ok_or_else(|| RealtimeError::InvalidInput("no conversation selected".to_string()))?;

        let uploaded = match self.rest.upload_media(file_name, bytes, mime_type).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                warn!(peer_id, "Failed to upload media: {}", e);
                self.events.publish(ChatEvent::SendFailed {
                    peer_id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        self.send_message(file_name, kind, Some(uploaded.file_path)).await
    }

    /// Пометить сообщение прочитанным
    ///
    /// Сначала REST; только после подтверждения меняется локальное состояние
    /// и уходит кадр отправителю. Ошибка логируется и не пробрасывается.
    pub async fn mark_message_read(&mut self, message_id: MessageId) -> bool {
        if self.store.is_read(message_id) == Some(true) {
            debug!(message_id, "Message already read");
            return true;
        }

        if let Err(e) = self.rest.mark_read(message_id).await {
            warn!(message_id, "Failed to mark message as read: {}", e);
            return false;
        }

        if self.store.mark_read(message_id) {
            self.events.publish(ChatEvent::MessageRead { message_id });
        }
        send_read_receipt(&self.connection, message_id);
        true
    }

    // === "Печатает" ===

    /// Поле ввода изменилось. Возвращает true, если кадр `typing` ушел.
    pub fn on_input_changed(&mut self, content: &str, now_ms: u64) -> bool {
        let Some(peer_id) = self.store.active_peer() else {
            return false;
        };
        let Some(is_typing) = self.debouncer.on_input(content, now_ms) else {
            return false;
        };
        let sent = send_typing(&self.connection, peer_id, is_typing);
        if !sent {
            // Кадр не ушел: после подключения объявить набор заново
            self.debouncer.reset();
        }
        sent
    }

    fn stop_own_typing(&mut self, peer_id: UserId) {
        if let Some(is_typing) = self.debouncer.on_sent() {
            send_typing(&self.connection, peer_id, is_typing);
        }
    }

    pub fn is_peer_typing(&self, peer_id: UserId, now_ms: u64) -> bool {
        self.typing.is_typing(peer_id, now_ms)
    }

    pub fn typing_peers(&self, now_ms: u64) -> Vec<UserId> {
        self.typing.typing_peers(now_ms)
    }

    // === Прочее ===

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn rest(&self) -> &R {
        &self.rest
    }

    pub fn transport(&self) -> &T {
        self.connection.transport()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_state().attempts()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Logout: закрыть канал и забыть все состояние сессии
    pub fn shutdown(mut self, now_ms: u64) {
        self.disconnect();
        self.store.clear_all();
        for peer_id in self.typing.clear(now_ms) {
            self.events.publish(ChatEvent::TypingChanged {
                peer_id,
                is_typing: false,
            });
        }
        self.debouncer.reset();
        info!(user_id = self.session.user_id, "Chat client shut down");
    }
}
