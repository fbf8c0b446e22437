// Типы ошибок

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("WASM serialization error: {0}")]
    SerdeWasmError(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(error: serde_json::Error) -> Self {
        RealtimeError::SerializationError(error.to_string())
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => RealtimeError::HttpError {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None if error.is_decode() => RealtimeError::SerializationError(error.to_string()),
            None => RealtimeError::NetworkError(error.to_string()),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl From<serde_wasm_bindgen::Error> for RealtimeError {
    fn from(error: serde_wasm_bindgen::Error) -> Self {
        RealtimeError::SerdeWasmError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;

// Для WASM-биндингов
#[cfg(target_arch = "wasm32")]
impl From<RealtimeError> for wasm_bindgen::JsValue {
    fn from(error: RealtimeError) -> Self {
        wasm_bindgen::JsValue::from_str(&error.to_string())
    }
}
