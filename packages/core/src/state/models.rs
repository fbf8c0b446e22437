// Модели данных клиента
//
// Доменные типы, которые видит UI. Wire-форматы живут в `protocol::messages`,
// REST-форматы в `api::rest`; оба конвертируются сюда.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::utils::error::RealtimeError;

pub type UserId = u64;
pub type MessageId = u64;

/// Тип содержимого сообщения
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Sticker,
    File,
}

impl MessageKind {
    /// Требует ли тип ссылку на медиа
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Sticker => "sticker",
            MessageKind::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "audio" => Ok(MessageKind::Audio),
            "sticker" => Ok(MessageKind::Sticker),
            "file" => Ok(MessageKind::File),
            other => Err(RealtimeError::InvalidInput(format!("unknown message type: {}", other))),
        }
    }
}

/// Сообщение в истории беседы
///
/// Неизменяемо после создания, кроме `is_read` (false -> true ровно один раз).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub is_own: bool,
}

impl Message {
    /// Входящее и еще не прочитанное зрителем
    pub fn is_unread_inbound(&self) -> bool {
        !self.is_own && !self.is_read
    }
}

/// Краткое содержание последнего сообщения для списка бесед
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub content: String,
    pub kind: MessageKind,
    pub created_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_own: bool,
}

impl From<&Message> for LastMessageSummary {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            kind: msg.kind,
            created_at: Some(msg.created_at),
            is_read: msg.is_read,
            is_own: msg.is_own,
        }
    }
}

/// Беседа с одним собеседником
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub peer_id: UserId,
    pub peer_display_name: String,
    pub peer_avatar: Option<String>,
    pub last_message: Option<LastMessageSummary>,
    /// Счетчик сервера; для открытой беседы пересчитывается из истории
    pub unread_count: u32,
    /// Эвристика: собеседник присылал кадры в текущем соединении
    pub is_online: bool,
}

impl Conversation {
    pub fn new(peer_id: UserId, peer_display_name: String) -> Self {
        Self {
            peer_id,
            peer_display_name,
            peer_avatar: None,
            last_message: None,
            unread_count: 0,
            is_online: false,
        }
    }
}
