// Типы кадров realtime канала
// Соответствуют JSON-кадрам endpoint'а `/ws/{user_id}`

use crate::state::models::{Message, MessageId, MessageKind, UserId};
use crate::utils::time::{deserialize_opt_timestamp, deserialize_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Server -> Client
// ============================================================================

/// Отправитель сообщения (вложенный объект `sender`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderData {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl SenderData {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Новое сообщение от собеседника
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessageData {
    pub id: MessageId,
    pub sender: SenderData,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl IncomingMessageData {
    /// Собрать доменное сообщение; `is_own` определяется по пользователю сессии
    pub fn into_message(self, session_user_id: UserId) -> Message {
        let sender_name = self.sender.display_name();
        Message {
            id: self.id,
            sender_id: self.sender.id,
            sender_name,
            content: self.content,
            kind: self.message_type,
            media_ref: self.media_url,
            is_read: self.is_read,
            created_at: self.created_at,
            is_own: self.sender.id == session_user_id,
        }
    }
}

/// Собеседник начал/закончил печатать
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingData {
    pub sender_id: UserId,
    #[serde(default = "default_is_typing")]
    pub is_typing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

fn default_is_typing() -> bool {
    true
}

/// Собеседник прочитал наше сообщение
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadNotificationData {
    pub message_id: MessageId,
    pub read_by: UserId,
    #[serde(default, deserialize_with = "deserialize_opt_timestamp")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Кадры от сервера (сервер -> клиент)
///
/// Закрытый набор: новый тип кадра требует нового варианта и обработки
/// в dispatcher'е. Нераспознанный `type` превращается в `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(IncomingMessageData),
    Typing(TypingData),
    MessageRead(ReadNotificationData),
    Pong,
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Message(_) => "message",
            InboundFrame::Typing(_) => "typing",
            InboundFrame::MessageRead(_) => "message_read",
            InboundFrame::Pong => "pong",
            InboundFrame::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Client -> Server
// ============================================================================

/// Состояние набора текста для собеседника
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingCommand {
    pub recipient_id: UserId,
    pub is_typing: bool,
}

/// Подтверждение прочтения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptCommand {
    pub message_id: MessageId,
}

/// Кадры клиента (клиент -> сервер)
///
/// Содержимое сообщений сюда не входит: оно уходит через REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Typing(TypingCommand),
    MessageRead(ReadReceiptCommand),
    Heartbeat,
}
