// Исходящие команды realtime канала
//
// Best effort: без открытого соединения команда отбрасывается, очереди нет.
// Текст сообщений через сокет не отправляется, только через REST.

use crate::protocol::messages::{OutboundFrame, ReadReceiptCommand, TypingCommand};
use crate::protocol::transport::Transport;
use crate::realtime::connection::ConnectionManager;
use crate::state::models::{MessageId, UserId};
use crate::utils::error::RealtimeError;
use tracing::{debug, warn};

/// Отправить кадр, если соединение открыто. Возвращает true, если кадр ушел.
fn send_best_effort<T: Transport>(conn: &ConnectionManager<T>, frame: OutboundFrame) -> bool {
    match conn.send_frame(&frame) {
        Ok(()) => true,
        Err(RealtimeError::NotConnected(reason)) => {
            debug!("Dropping {:?}: {}", frame, reason);
            false
        }
        Err(e) => {
            warn!("Failed to send {:?}: {}", frame, e);
            false
        }
    }
}

/// Сообщить собеседнику, что пользователь печатает (или перестал)
pub fn send_typing<T: Transport>(conn: &ConnectionManager<T>, peer_id: UserId, is_typing: bool) -> bool {
    send_best_effort(
        conn,
        OutboundFrame::Typing(TypingCommand {
            recipient_id: peer_id,
            is_typing,
        }),
    )
}

/// Уведомить отправителя о прочтении (после подтверждения REST)
pub fn send_read_receipt<T: Transport>(conn: &ConnectionManager<T>, message_id: MessageId) -> bool {
    send_best_effort(conn, OutboundFrame::MessageRead(ReadReceiptCommand { message_id }))
}

/// Heartbeat, сервер отвечает `pong`
pub fn send_heartbeat<T: Transport>(conn: &ConnectionManager<T>) -> bool {
    send_best_effort(conn, OutboundFrame::Heartbeat)
}
