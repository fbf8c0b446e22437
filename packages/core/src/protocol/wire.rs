// Wire format (JSON текстовые кадры)
// Используется для передачи кадров через WebSocket

use crate::protocol::messages::{InboundFrame, OutboundFrame};
use crate::utils::error::{RealtimeError, Result};

/// Упаковать OutboundFrame в JSON (клиент -> сервер)
pub fn encode_outbound(frame: &OutboundFrame) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|e| RealtimeError::SerializationError(format!("JSON encode error: {}", e)))
}

/// Распаковать JSON в InboundFrame (сервер -> клиент)
pub fn decode_inbound(raw: &str) -> Result<InboundFrame> {
    serde_json::from_str(raw)
        .map_err(|e| RealtimeError::SerializationError(format!("JSON decode error: {}", e)))
}
