// События для UI
//
// Вместо глобального callback'а "обнови список" компоненты подписываются
// на шину, которой владеет ChatClient.

use crate::realtime::connection::ConnectionState;
use crate::state::models::{MessageId, UserId};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use serde::Serialize;

/// Что изменилось в состоянии клиента
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    ConversationsUpdated,
    HistoryLoaded { peer_id: UserId },
    MessageAppended { peer_id: UserId, message_id: MessageId },
    MessageRead { message_id: MessageId },
    TypingChanged { peer_id: UserId, is_typing: bool },
    ConnectionChanged { state: ConnectionState },
    SendFailed { peer_id: UserId, reason: String },
}

/// Шина событий: publish/subscribe на unbounded каналах
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<UnboundedSender<ChatEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<ChatEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Разослать событие. Закрытые подписки удаляются.
    pub fn publish(&mut self, event: ChatEvent) {
        self.subscribers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
