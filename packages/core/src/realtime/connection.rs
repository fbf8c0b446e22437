// Менеджер realtime соединения
//
// Один экземпляр на сессию, одно живое соединение на экземпляр.

use crate::config::Config;
use crate::protocol::messages::OutboundFrame;
use crate::protocol::transport::{EventSender, ReadyState, Transport, TransportEvent};
use crate::protocol::wire::encode_outbound;
use crate::state::models::UserId;
use crate::utils::error::{RealtimeError, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Состояние соединения
///
/// `Closed -> Connecting -> Open -> Closed`; после обрыва вместо `Closed`
/// возможен `Backoff`, пока не исчерпаны попытки переподключения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Backoff { attempt: u32, retry_at_ms: u64 },
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Состояние автоматического переподключения
#[derive(Debug, Clone)]
pub struct ReconnectState {
    /// Количество попыток переподключения подряд
    attempts: u32,
    /// Максимальное количество попыток (0 = бесконечно)
    max_attempts: u32,
    /// Текущая задержка в миллисекундах
    current_delay_ms: u64,
    /// Начальная задержка в миллисекундах
    initial_delay_ms: u64,
    /// Максимальная задержка в миллисекундах
    max_delay_ms: u64,
    /// Включено ли автоматическое переподключение
    enabled: bool,
}

impl ReconnectState {
    pub fn new(config: &Config) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.websocket_retry_max_attempts,
            current_delay_ms: config.websocket_retry_initial_ms,
            initial_delay_ms: config.websocket_retry_initial_ms,
            max_delay_ms: config.websocket_retry_max_ms,
            enabled: config.reconnect_enabled,
        }
    }

    /// Вычислить следующую задержку с exponential backoff
    pub fn next_delay(&mut self) -> u64 {
        let delay = self.current_delay_ms;

        // Exponential backoff: удваиваем задержку
        self.current_delay_ms = self.current_delay_ms.saturating_mul(2).min(self.max_delay_ms);
        self.attempts += 1;

        delay
    }

    /// Сбросить счётчик попыток
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay_ms = self.initial_delay_ms;
    }

    /// Проверить, можно ли продолжать попытки
    pub fn can_retry(&self) -> bool {
        self.enabled && (self.max_attempts == 0 || self.attempts < self.max_attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Собрать адрес realtime endpoint'а: `ws(s)://host/ws/{user_id}?token=...`
pub fn endpoint_url(base_url: &str, path_prefix: &str, user_id: UserId, token: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(RealtimeError::InvalidInput(format!(
            "base url must start with http(s):// or ws(s)://, got {}",
            base_url
        )));
    };

    Ok(format!(
        "{}/{}/{}?token={}",
        ws_base,
        path_prefix.trim_matches('/'),
        user_id,
        urlencoding::encode(token)
    ))
}

/// Менеджер жизненного цикла одного соединения
pub struct ConnectionManager<T: Transport> {
    transport: T,
    events: EventSender,
    state: ConnectionState,
    endpoint: Option<String>,
    reconnect: ReconnectState,
    reconnect_enabled: bool,
    connection_id: Option<Uuid>,
    heartbeat_interval_ms: u64,
    last_heartbeat_ms: u64,
    base_url: String,
    path_prefix: String,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, events: EventSender, config: &Config) -> Self {
        Self {
            transport,
            events,
            state: ConnectionState::Closed,
            endpoint: None,
            reconnect: ReconnectState::new(config),
            reconnect_enabled: config.reconnect_enabled,
            connection_id: None,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            last_heartbeat_ms: 0,
            base_url: config.api_base_url.clone(),
            path_prefix: config.ws_path_prefix.clone(),
        }
    }

    /// Открыть соединение для пользователя сессии
    ///
    /// Повторный вызов при живом соединении ничего не делает. Ошибка
    /// транспорта логируется и переводит менеджер в `Closed`/`Backoff`.
    pub fn connect(&mut self, user_id: UserId, token: &str, now_ms: u64) -> Result<()> {
        if self.state.is_live() {
            debug!("connect() ignored: connection already {:?}", self.state);
            return Ok(());
        }

        let url = endpoint_url(&self.base_url, &self.path_prefix, user_id, token)?;
        self.endpoint = Some(url);
        self.reconnect.reset();
        // disconnect() выключает переподключение, новый connect() возвращает настройку
        self.reconnect.set_enabled(self.reconnect_enabled);
        self.open_transport(now_ms)
    }

    fn open_transport(&mut self, now_ms: u64) -> Result<()> {
        let url = self
            .endpoint
            .clone()
            .ok_or_else(|| RealtimeError::InternalError("endpoint is not set".to_string()))?;

        let connection_id = Uuid::new_v4();
        self.connection_id = Some(connection_id);
        self.state = ConnectionState::Connecting;
        info!(%connection_id, attempt = self.reconnect.attempts(), "Opening realtime connection");

        match self.transport.open(&url, self.events.clone()) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(%connection_id, "Failed to open realtime connection: {}", e);
                self.schedule_retry(now_ms);
                Err(e)
            }
        }
    }

    fn schedule_retry(&mut self, now_ms: u64) {
        if self.reconnect.can_retry() {
            let delay = self.reconnect.next_delay();
            self.state = ConnectionState::Backoff {
                attempt: self.reconnect.attempts(),
                retry_at_ms: now_ms + delay,
            };
            info!("Reconnect scheduled in {} ms (attempt {})", delay, self.reconnect.attempts());
        } else {
            if self.reconnect.attempts() > 0 {
                warn!("Giving up on realtime connection after {} attempts", self.reconnect.attempts());
            }
            self.state = ConnectionState::Closed;
        }
    }

    /// Закрыть соединение. Без активного соединения ничего не делает.
    pub fn disconnect(&mut self) {
        self.reconnect.set_enabled(false);
        if self.state == ConnectionState::Closed && self.transport.ready_state() == ReadyState::Closed {
            return;
        }
        if let Err(e) = self.transport.close() {
            error!("Failed to close realtime connection: {}", e);
        }
        self.state = ConnectionState::Closed;
        info!(connection_id = ?self.connection_id, "Realtime connection closed by client");
    }

    /// Применить событие транспорта. Возвращает true, если состояние изменилось.
    pub fn on_event(&mut self, event: &TransportEvent, now_ms: u64) -> bool {
        let before = self.state;
        match event {
            // Событие от уже закрытого соединения: текущий сокет его не подтверждает
            TransportEvent::Opened if self.transport.ready_state() != ReadyState::Open => {
                debug!(connection_id = ?self.connection_id, "Ignoring stale open event");
            }
            TransportEvent::Closed { code, .. } if self.is_stale_close() => {
                debug!(connection_id = ?self.connection_id, code, "Ignoring stale close event");
            }
            TransportEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                    self.reconnect.reset();
                    self.last_heartbeat_ms = now_ms;
                    info!(connection_id = ?self.connection_id, "Realtime connection open");
                }
            }
            TransportEvent::Error(message) => {
                // Браузер всегда присылает close после error, состояние меняем там
                error!(connection_id = ?self.connection_id, "Realtime transport error: {}", message);
            }
            TransportEvent::Closed { code, reason } => {
                if self.state.is_live() {
                    warn!(
                        connection_id = ?self.connection_id,
                        "Realtime connection dropped: {} {}", code, reason
                    );
                    self.schedule_retry(now_ms);
                }
            }
            TransportEvent::Frame(_) => {}
        }
        before != self.state
    }

    /// Close пришел, а текущий сокет еще жив: это хвост предыдущего соединения
    fn is_stale_close(&self) -> bool {
        self.state.is_live()
            && matches!(
                self.transport.ready_state(),
                ReadyState::Connecting | ReadyState::Open
            )
    }

    /// Переподключиться, если истекла пауза backoff. Возвращает true при попытке.
    pub fn poll_reconnect(&mut self, now_ms: u64) -> bool {
        match self.state {
            ConnectionState::Backoff { retry_at_ms, .. } if now_ms >= retry_at_ms => {
                // Ошибка уже залогирована, следующий шаг выберет schedule_retry
                let _ = self.open_transport(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Пора ли отправить heartbeat
    pub fn heartbeat_due(&self, now_ms: u64) -> bool {
        self.is_open()
            && self.heartbeat_interval_ms > 0
            && now_ms.saturating_sub(self.last_heartbeat_ms) >= self.heartbeat_interval_ms
    }

    pub fn mark_heartbeat(&mut self, now_ms: u64) {
        self.last_heartbeat_ms = now_ms;
    }

    /// Ближайший момент, когда менеджеру нужен `poll`
    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            ConnectionState::Backoff { retry_at_ms, .. } => Some(retry_at_ms),
            ConnectionState::Open if self.heartbeat_interval_ms > 0 => {
                Some(self.last_heartbeat_ms + self.heartbeat_interval_ms)
            }
            _ => None,
        }
    }

    /// Ready-state guard: и менеджер, и сокет считают соединение открытым
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.transport.ready_state() == ReadyState::Open
    }

    /// Отправить кадр. Без открытого соединения возвращает `NotConnected`.
    pub fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotConnected(format!(
                "connection is {:?}",
                self.state
            )));
        }
        let text = encode_outbound(frame)?;
        self.transport.send_text(&text)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_state(&self) -> &ReconnectState {
        &self.reconnect
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
