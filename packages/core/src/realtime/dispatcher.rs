// Разбор входящих кадров
//
// Dispatcher синхронный: он меняет состояние и возвращает эффекты, которые
// требуют REST (обновить список, подтвердить прочтение). Выполняет их ChatClient.

use crate::protocol::messages::{IncomingMessageData, InboundFrame, ReadNotificationData, TypingData};
use crate::protocol::wire::decode_inbound;
use crate::realtime::typing::TypingTracker;
use crate::state::conversations::ConversationStore;
use crate::state::events::{ChatEvent, EventBus};
use crate::state::models::{MessageId, UserId};
use tracing::{debug, trace};

/// Действие, которое нужно выполнить после разбора кадра
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Перезагрузить список бесед с сервера
    RefreshConversations,
    /// Пометить сообщение прочитанным (REST, затем кадр в сокет)
    MarkRead(MessageId),
}

/// Все, что dispatcher'у можно менять при разборе кадра
pub struct DispatchContext<'a> {
    pub store: &'a mut ConversationStore,
    pub typing: &'a mut TypingTracker,
    pub events: &'a mut EventBus,
    pub session_user_id: UserId,
    pub now_ms: u64,
}

/// Счетчики разобранных кадров
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: u64,
    pub ignored: u64,
    pub malformed: u64,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Разобрать текстовый кадр
    ///
    /// Некорректный JSON и неизвестный `type` не меняют состояние.
    pub fn dispatch(&mut self, raw: &str, ctx: DispatchContext<'_>) -> Vec<Effect> {
        let frame = match decode_inbound(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Dropping malformed frame: {}", e);
                return Vec::new();
            }
        };

        trace!(kind = frame.kind(), "Inbound frame");
        match frame {
            InboundFrame::Message(data) => {
                self.stats.handled += 1;
                on_message(data, ctx)
            }
            InboundFrame::Typing(data) => {
                self.stats.handled += 1;
                on_typing(data, ctx);
                Vec::new()
            }
            InboundFrame::MessageRead(data) => {
                self.stats.handled += 1;
                on_message_read(data, ctx);
                Vec::new()
            }
            InboundFrame::Pong => {
                self.stats.handled += 1;
                Vec::new()
            }
            InboundFrame::Unknown => {
                self.stats.ignored += 1;
                debug!("Ignoring frame of unknown type");
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

fn on_message(data: IncomingMessageData, ctx: DispatchContext<'_>) -> Vec<Effect> {
    let avatar = data.sender.avatar.clone();
    let message = data.into_message(ctx.session_user_id);
    let (message_id, peer_id) = (message.id, message.sender_id);
    let mut effects = Vec::new();

    if !message.is_own {
        ctx.store.mark_peer_seen(peer_id);
        // Сообщение гасит индикатор "печатает" отправителя
        if ctx.typing.set(peer_id, false, ctx.now_ms) {
            ctx.events.publish(ChatEvent::TypingChanged {
                peer_id,
                is_typing: false,
            });
        }
    }

    if ctx.store.is_open(peer_id) {
        let needs_receipt = message.is_unread_inbound();
        if ctx.store.append_incoming(message) {
            ctx.events.publish(ChatEvent::MessageAppended { peer_id, message_id });
            if needs_receipt {
                effects.push(Effect::MarkRead(message_id));
            }
        }
    } else if !message.is_own {
        ctx.store.note_inbound(&message, avatar);
        ctx.events.publish(ChatEvent::ConversationsUpdated);
    }

    effects.push(Effect::RefreshConversations);
    effects
}

fn on_typing(data: TypingData, ctx: DispatchContext<'_>) {
    if data.sender_id == ctx.session_user_id {
        return;
    }
    ctx.store.mark_peer_seen(data.sender_id);
    if ctx.typing.set(data.sender_id, data.is_typing, ctx.now_ms) {
        ctx.events.publish(ChatEvent::TypingChanged {
            peer_id: data.sender_id,
            is_typing: data.is_typing,
        });
    }
}

fn on_message_read(data: ReadNotificationData, ctx: DispatchContext<'_>) {
    let is_own_message = ctx
        .store
        .active_messages()
        .iter()
        .any(|m| m.id == data.message_id && m.is_own);

    if is_own_message && ctx.store.mark_read(data.message_id) {
        ctx.events.publish(ChatEvent::MessageRead {
            message_id: data.message_id,
        });
    }
}
