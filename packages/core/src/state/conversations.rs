// Состояние бесед

use crate::state::models::{Conversation, LastMessageSummary, Message, MessageId, UserId};
use std::collections::HashSet;
use tracing::debug;

/// Квитанция выбора беседы
///
/// Ответ на запрос истории применяется, только если с момента выбора
/// пользователь не переключился на другую беседу.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket {
    pub peer_id: UserId,
    generation: u64,
}

/// Открытая беседа и ее история
#[derive(Debug, Clone)]
struct ActiveConversation {
    peer_id: UserId,
    messages: Vec<Message>,
    history_loaded: bool,
}

impl ActiveConversation {
    fn unread_count(&self) -> u32 {
        self.messages.iter().filter(|m| m.is_unread_inbound()).count() as u32
    }
}

/// Хранилище бесед текущей сессии (только память)
///
/// Список бесед приходит целиком с сервера, история хранится только для
/// открытой беседы. Для нее `unread_count` всегда равен числу входящих
/// непрочитанных сообщений в истории.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: Option<ActiveConversation>,
    generation: u64,
    seen_peers: HashSet<UserId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Список бесед ===

    /// Заменить список целиком (reconciliation fetch)
    pub fn replace_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations;
        for conversation in &mut self.conversations {
            conversation.is_online = self.seen_peers.contains(&conversation.peer_id);
        }
        self.sync_active_unread();
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, peer_id: UserId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.peer_id == peer_id)
    }

    /// Получить или создать беседу
    fn get_or_create(&mut self, peer_id: UserId, peer_display_name: &str) -> &mut Conversation {
        let index = match self.conversations.iter().position(|c| c.peer_id == peer_id) {
            Some(index) => index,
            None => {
                let mut conversation = Conversation::new(peer_id, peer_display_name.to_string());
                conversation.is_online = self.seen_peers.contains(&peer_id);
                self.conversations.insert(0, conversation);
                0
            }
        };
        &mut self.conversations[index]
    }

    // === Выбор беседы ===

    /// Открыть беседу. История пустая до `apply_history`.
    pub fn begin_selection(&mut self, peer_id: UserId) -> SelectionTicket {
        self.generation += 1;
        self.active = Some(ActiveConversation {
            peer_id,
            messages: Vec::new(),
            history_loaded: false,
        });
        SelectionTicket {
            peer_id,
            generation: self.generation,
        }
    }

    /// Применить историю. Устаревший ответ отбрасывается (возвращает false).
    pub fn apply_history(&mut self, ticket: SelectionTicket, messages: Vec<Message>) -> bool {
        if ticket.generation != self.generation {
            debug!(peer_id = ticket.peer_id, "Discarding stale history response");
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        // Кадры, пришедшие пока история грузилась, остаются после нее
        let live = std::mem::replace(&mut active.messages, messages);
        for message in live {
            match active.messages.iter_mut().find(|m| m.id == message.id) {
                Some(known) => known.is_read |= message.is_read,
                None => active.messages.push(message),
            }
        }
        active.history_loaded = true;
        let last = active.messages.last().map(LastMessageSummary::from);

        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.peer_id == ticket.peer_id) {
            if last.is_some() {
                conversation.last_message = last;
            }
        }
        self.sync_active_unread();
        true
    }

    /// Закрыть открытую беседу; незавершенные запросы истории станут устаревшими
    pub fn close_conversation(&mut self) -> Option<UserId> {
        self.generation += 1;
        self.active.take().map(|a| a.peer_id)
    }

    pub fn active_peer(&self) -> Option<UserId> {
        self.active.as_ref().map(|a| a.peer_id)
    }

    pub fn is_open(&self, peer_id: UserId) -> bool {
        self.active_peer() == Some(peer_id)
    }

    pub fn active_messages(&self) -> &[Message] {
        self.active
            .as_ref()
            .map(|a| a.messages.as_slice())
            .unwrap_or(&[])
    }

    // === Сообщения ===

    /// Добавить входящее сообщение в открытую беседу собеседника
    ///
    /// Порядок - порядок прихода. Дубликат по id игнорируется.
    pub fn append_incoming(&mut self, message: Message) -> bool {
        let peer_id = message.sender_id;
        self.append_to_active(peer_id, message)
    }

    /// Добавить собственное сообщение после успешного ответа REST
    pub fn append_outgoing(&mut self, peer_id: UserId, message: Message) -> bool {
        let summary = LastMessageSummary::from(&message);
        self.get_or_create(peer_id, "").last_message = Some(summary);
        self.append_to_active(peer_id, message)
    }

    /// Учесть входящее сообщение в неоткрытой беседе (до reconciliation)
    pub fn note_inbound(&mut self, message: &Message, peer_avatar: Option<String>) {
        let summary = LastMessageSummary::from(message);
        let conversation = self.get_or_create(message.sender_id, &message.sender_name);
        if conversation.peer_avatar.is_none() {
            conversation.peer_avatar = peer_avatar;
        }
        conversation.last_message = Some(summary);
        if message.is_unread_inbound() {
            conversation.unread_count += 1;
        }
    }

    fn append_to_active(&mut self, peer_id: UserId, message: Message) -> bool {
        let Some(active) = self.active.as_mut().filter(|a| a.peer_id == peer_id) else {
            return false;
        };
        if active.messages.iter().any(|m| m.id == message.id) {
            debug!(message_id = message.id, "Duplicate message ignored");
            return false;
        }
        active.messages.push(message);
        self.sync_active_unread();
        true
    }

    /// Отметить сообщение прочитанным. Повторный вызов ничего не меняет.
    pub fn mark_read(&mut self, message_id: MessageId) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let Some(message) = active.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if message.is_read {
            return false;
        }
        message.is_read = true;
        self.sync_active_unread();
        true
    }

    /// Прочитано ли сообщение открытой беседы; `None`, если его там нет
    pub fn is_read(&self, message_id: MessageId) -> Option<bool> {
        self.active_messages()
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.is_read)
    }

    /// Непрочитанные входящие сообщения открытой беседы
    pub fn unread_inbound_ids(&self) -> Vec<MessageId> {
        self.active_messages()
            .iter()
            .filter(|m| m.is_unread_inbound())
            .map(|m| m.id)
            .collect()
    }

    pub fn unread_count(&self, peer_id: UserId) -> u32 {
        match self.active.as_ref() {
            Some(active) if active.peer_id == peer_id && active.history_loaded => active.unread_count(),
            _ => self.conversation(peer_id).map_or(0, |c| c.unread_count),
        }
    }

    /// Общее количество непрочитанных сообщений
    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    fn sync_active_unread(&mut self) {
        let Some(active) = self.active.as_ref().filter(|a| a.history_loaded) else {
            return;
        };
        let (peer_id, unread) = (active.peer_id, active.unread_count());
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.peer_id == peer_id) {
            conversation.unread_count = unread;
        }
    }

    // === Присутствие ===

    /// Собеседник прислал кадр: считаем его онлайн до конца сессии
    pub fn mark_peer_seen(&mut self, peer_id: UserId) {
        self.seen_peers.insert(peer_id);
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.peer_id == peer_id) {
            conversation.is_online = true;
        }
    }

    /// Очистить все беседы
    pub fn clear_all(&mut self) {
        self.conversations.clear();
        self.active = None;
        self.seen_peers.clear();
        self.generation += 1;
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::MessageKind;
    use chrono::Utc;

    fn inbound(id: MessageId, from: UserId, is_read: bool) -> Message {
        Message {
            id,
            sender_id: from,
            sender_name: "Peer".to_string(),
            content: format!("msg {}", id),
            kind: MessageKind::Text,
            media_ref: None,
            is_read,
            created_at: Utc::now(),
            is_own: false,
        }
    }

    fn own(id: MessageId) -> Message {
        Message {
            is_own: true,
            sender_id: 1,
            ..inbound(id, 1, false)
        }
    }

    fn store_with(peer_id: UserId, server_unread: u32) -> ConversationStore {
        let mut store = ConversationStore::new();
        let mut conversation = Conversation::new(peer_id, "Peer".to_string());
        conversation.unread_count = server_unread;
        store.replace_conversations(vec![conversation]);
        store
    }

    #[test]
    fn test_unread_matches_history() {
        let mut store = store_with(42, 5);
        let ticket = store.begin_selection(42);
        assert!(store.apply_history(ticket, vec![inbound(1, 42, false), inbound(2, 42, true), own(3)]));

        assert_eq!(store.unread_count(42), 1);
        assert_eq!(store.conversation(42).unwrap().unread_count, 1);
        assert_eq!(store.unread_inbound_ids(), vec![1]);
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let mut store = store_with(42, 0);
        let ticket = store.begin_selection(42);
        store.apply_history(ticket, vec![inbound(1, 42, false), inbound(2, 42, false)]);
        assert_eq!(store.total_unread(), 2);

        assert!(store.mark_read(1));
        assert_eq!(store.unread_count(42), 1);
        assert!(!store.mark_read(1));
        assert_eq!(store.unread_count(42), 1);
        assert!(!store.mark_read(999));
    }

    #[test]
    fn test_stale_history_is_discarded() {
        let mut store = store_with(42, 0);
        let first = store.begin_selection(42);
        let second = store.begin_selection(7);

        assert!(!store.apply_history(first, vec![inbound(1, 42, false)]));
        assert!(store.active_messages().is_empty());
        assert!(store.apply_history(second, vec![inbound(2, 7, false)]));
        assert_eq!(store.active_messages()[0].id, 2);

        store.close_conversation();
        assert!(!store.apply_history(second, vec![]));
    }

    #[test]
    fn test_append_keeps_arrival_order() {
        let mut store = store_with(42, 0);
        let ticket = store.begin_selection(42);
        store.apply_history(ticket, vec![]);

        let mut later = inbound(11, 42, false);
        later.created_at = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.append_incoming(inbound(10, 42, false)));
        assert!(store.append_incoming(later));
        assert!(!store.append_incoming(inbound(10, 42, false)));

        let ids: Vec<_> = store.active_messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(store.unread_count(42), 2);
    }

    #[test]
    fn test_live_messages_survive_history_load() {
        let mut store = store_with(42, 0);
        let ticket = store.begin_selection(42);

        assert!(store.append_incoming(inbound(100, 42, false)));
        assert!(store.mark_read(100));
        assert!(store.append_incoming(inbound(101, 42, false)));

        // 100 уже успело попасть в историю, но прочтение там еще не видно
        assert!(store.apply_history(ticket, vec![inbound(99, 42, true), inbound(100, 42, false)]));

        let ids: Vec<_> = store.active_messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![99, 100, 101]);
        assert_eq!(store.is_read(100), Some(true));
        assert_eq!(store.is_read(7), None);
        assert_eq!(store.unread_inbound_ids(), vec![101]);
        assert_eq!(store.unread_count(42), 1);
    }

    #[test]
    fn test_inbound_for_closed_conversation() {
        let mut store = store_with(42, 0);
        store.begin_selection(7);

        let msg = inbound(5, 42, false);
        assert!(!store.append_incoming(msg.clone()));
        store.note_inbound(&msg, None);
        assert_eq!(store.unread_count(42), 1);

        // новая беседа появляется в начале списка
        store.note_inbound(&inbound(6, 99, false), Some("a.png".to_string()));
        assert_eq!(store.conversations()[0].peer_id, 99);
        assert_eq!(store.conversation_count(), 2);
    }

    #[test]
    fn test_outgoing_updates_summary() {
        let mut store = store_with(42, 0);
        let ticket = store.begin_selection(42);
        store.apply_history(ticket, vec![]);

        assert!(store.append_outgoing(42, own(20)));
        let summary = store.conversation(42).unwrap().last_message.clone().unwrap();
        assert!(summary.is_own);
        assert_eq!(store.unread_count(42), 0);
    }

    #[test]
    fn test_seen_peers_survive_reconciliation() {
        let mut store = store_with(42, 0);
        store.mark_peer_seen(42);
        assert!(store.conversation(42).unwrap().is_online);

        store.replace_conversations(vec![Conversation::new(42, "Peer".to_string())]);
        assert!(store.conversation(42).unwrap().is_online);

        store.clear_all();
        assert_eq!(store.conversation_count(), 0);
    }
}
