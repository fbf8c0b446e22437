// WebSocket транспорт
// Обертка над браузерным WebSocket API (WASM) и tokio-tungstenite (desktop)

use crate::utils::error::Result;
use futures::channel::mpsc::UnboundedSender;

/// Состояние сокета в нумерации браузерного `WebSocket.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

/// События сокета, которые транспорт отдает наружу
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed { code: u16, reason: String },
}

pub type EventSender = UnboundedSender<TransportEvent>;

/// Абстракция над одним WebSocket соединением
///
/// Реализация не переподключается сама: это решает `ConnectionManager`.
pub trait Transport {
    /// Начать подключение. События приходят в `events` асинхронно.
    fn open(&mut self, url: &str, events: EventSender) -> Result<()>;

    /// Отправить текстовый кадр
    fn send_text(&self, text: &str) -> Result<()>;

    /// Закрыть соединение. Безопасно вызывать повторно.
    fn close(&mut self) -> Result<()>;

    fn ready_state(&self) -> ReadyState;
}

#[cfg(target_arch = "wasm32")]
pub use browser::WebSocketTransport;

#[cfg(all(feature = "desktop", not(target_arch = "wasm32")))]
pub use native::TungsteniteTransport;

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::{EventSender, ReadyState, Transport, TransportEvent};
    use crate::utils::error::{RealtimeError, Result};
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

    /// WebSocket транспорт для WASM
    ///
    /// Closure'ы хранятся в транспорте, а не `forget()`-ятся: при `close()`
    /// обработчики снимаются и память освобождается вместе с транспортом.
    pub struct WebSocketTransport {
        ws: Option<WebSocket>,
        on_open: Option<Closure<dyn FnMut(Event)>>,
        on_message: Option<Closure<dyn FnMut(MessageEvent)>>,
        on_error: Option<Closure<dyn FnMut(Event)>>,
        on_close: Option<Closure<dyn FnMut(CloseEvent)>>,
    }

    impl WebSocketTransport {
        pub fn new() -> Self {
            Self {
                ws: None,
                on_open: None,
                on_message: None,
                on_error: None,
                on_close: None,
            }
        }

        fn detach_handlers(&mut self) {
            if let Some(ws) = &self.ws {
                ws.set_onopen(None);
                ws.set_onmessage(None);
                ws.set_onerror(None);
                ws.set_onclose(None);
            }
            self.on_open = None;
            self.on_message = None;
            self.on_error = None;
            self.on_close = None;
        }
    }

    impl Default for WebSocketTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for WebSocketTransport {
        fn open(&mut self, url: &str, events: EventSender) -> Result<()> {
            self.detach_handlers();

            let ws = WebSocket::new(url).map_err(|e| {
                RealtimeError::NetworkError(format!("Failed to create WebSocket: {:?}", e))
            })?;

            let tx = events.clone();
            let on_open = Closure::wrap(Box::new(move |_event: Event| {
                let _ = tx.unbounded_send(TransportEvent::Opened);
            }) as Box<dyn FnMut(Event)>);
            ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

            let tx = events.clone();
            let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
                // Бинарные кадры протоколом не используются
                if let Some(text) = event.data().as_string() {
                    let _ = tx.unbounded_send(TransportEvent::Frame(text));
                }
            }) as Box<dyn FnMut(MessageEvent)>);
            ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

            let tx = events.clone();
            let on_error = Closure::wrap(Box::new(move |_event: Event| {
                let _ = tx.unbounded_send(TransportEvent::Error(
                    "WebSocket error occurred".to_string(),
                ));
            }) as Box<dyn FnMut(Event)>);
            ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

            let tx = events;
            let on_close = Closure::wrap(Box::new(move |event: CloseEvent| {
                let _ = tx.unbounded_send(TransportEvent::Closed {
                    code: event.code(),
                    reason: event.reason(),
                });
            }) as Box<dyn FnMut(CloseEvent)>);
            ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

            self.ws = Some(ws);
            self.on_open = Some(on_open);
            self.on_message = Some(on_message);
            self.on_error = Some(on_error);
            self.on_close = Some(on_close);
            Ok(())
        }

        fn send_text(&self, text: &str) -> Result<()> {
            let ws = self
                .ws
                .as_ref()
                .ok_or_else(|| RealtimeError::NotConnected("WebSocket not initialized".to_string()))?;

            if ws.ready_state() != WebSocket::OPEN {
                return Err(RealtimeError::NotConnected("socket is not open".to_string()));
            }

            ws.send_with_str(text).map_err(|e| {
                RealtimeError::NetworkError(format!("Failed to send frame: {:?}", e))
            })
        }

        fn close(&mut self) -> Result<()> {
            self.detach_handlers();
            if let Some(ws) = self.ws.take() {
                ws.close()
                    .map_err(|e| RealtimeError::NetworkError(format!("Failed to close: {:?}", e)))?;
            }
            Ok(())
        }

        fn ready_state(&self) -> ReadyState {
            self.ws
                .as_ref()
                .map(|ws| ReadyState::from_code(ws.ready_state()))
                .unwrap_or(ReadyState::Closed)
        }
    }

    impl Drop for WebSocketTransport {
        fn drop(&mut self) {
            let _ = self.close();
        }
    }
}

#[cfg(all(feature = "desktop", not(target_arch = "wasm32")))]
mod native {
    use super::{EventSender, ReadyState, Transport, TransportEvent};
    use crate::utils::error::{RealtimeError, Result};
    use futures::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tracing::{debug, error, info};

    /// Связь задачи соединения с транспортом
    ///
    /// У каждого `open()` свой экземпляр. После `close()` задача еще
    /// дописывает Close кадр, но ни событий, ни состояния наружу не отдает.
    struct Link {
        live: Arc<AtomicBool>,
        state: Arc<AtomicU16>,
        events: EventSender,
    }

    impl Link {
        fn emit(&self, event: TransportEvent) {
            if self.live.load(Ordering::SeqCst) {
                let _ = self.events.unbounded_send(event);
            } else {
                debug!("Dropping event of a closed connection: {:?}", event);
            }
        }

        fn set_state(&self, state: ReadyState) {
            if self.live.load(Ordering::SeqCst) {
                self.state.store(state.code(), Ordering::SeqCst);
            }
        }
    }

    /// Текущее соединение со стороны транспорта
    struct Current {
        live: Arc<AtomicBool>,
        state: Arc<AtomicU16>,
        outbound: mpsc::UnboundedSender<Message>,
    }

    impl Current {
        /// Отцепить задачу: закрытый канал заставит ее отправить Close и выйти
        fn detach(self) {
            self.live.store(false, Ordering::SeqCst);
        }
    }

    /// WebSocket транспорт для desktop (tokio-tungstenite)
    ///
    /// Одна tokio задача на соединение: читает сокет и пишет исходящие
    /// кадры из канала. События уходят в тот же `EventSender`, что и в WASM.
    pub struct TungsteniteTransport {
        current: Option<Current>,
    }

    impl TungsteniteTransport {
        pub fn new() -> Self {
            Self { current: None }
        }
    }

    impl Default for TungsteniteTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for TungsteniteTransport {
        fn open(&mut self, url: &str, events: EventSender) -> Result<()> {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                RealtimeError::NetworkError(format!("tokio runtime is not available: {}", e))
            })?;

            if let Some(previous) = self.current.take() {
                previous.detach();
            }

            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            let live = Arc::new(AtomicBool::new(true));
            let state = Arc::new(AtomicU16::new(ReadyState::Connecting.code()));
            self.current = Some(Current {
                live: Arc::clone(&live),
                state: Arc::clone(&state),
                outbound: tx,
            });

            let link = Link { live, state, events };
            let url = url.to_string();
            runtime.spawn(async move {
                let ws_stream = match connect_async(url.as_str()).await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("WebSocket connect failed: {}", e);
                        link.set_state(ReadyState::Closed);
                        link.emit(TransportEvent::Error(e.to_string()));
                        link.emit(TransportEvent::Closed {
                            code: 1006,
                            reason: "connect failed".to_string(),
                        });
                        return;
                    }
                };

                link.set_state(ReadyState::Open);
                link.emit(TransportEvent::Opened);
                info!("WebSocket connection established");

                let (mut write, mut read) = ws_stream.split();
                let mut close_code = 1005;
                let mut close_reason = String::new();

                loop {
                    tokio::select! {
                        outgoing = rx.recv() => match outgoing {
                            Some(msg) => {
                                if let Err(e) = write.send(msg).await {
                                    error!("WebSocket send error: {}", e);
                                    link.emit(TransportEvent::Error(e.to_string()));
                                    close_code = 1006;
                                    break;
                                }
                            }
                            None => {
                                // Отправитель закрыт: клиент вызвал close()
                                let _ = write.send(Message::Close(None)).await;
                                close_code = 1000;
                                break;
                            }
                        },
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                link.emit(TransportEvent::Frame(text));
                            }
                            Some(Ok(Message::Close(frame))) => {
                                if let Some(frame) = frame {
                                    close_code = u16::from(frame.code);
                                    close_reason = frame.reason.to_string();
                                }
                                break;
                            }
                            Some(Ok(other)) => {
                                debug!("Ignoring non-text frame: {:?}", other);
                            }
                            Some(Err(e)) => {
                                error!("WebSocket receive error: {}", e);
                                link.emit(TransportEvent::Error(e.to_string()));
                                close_code = 1006;
                                break;
                            }
                            None => {
                                close_code = 1006;
                                break;
                            }
                        },
                    }
                }

                link.set_state(ReadyState::Closed);
                link.emit(TransportEvent::Closed {
                    code: close_code,
                    reason: close_reason,
                });
            });

            Ok(())
        }

        fn send_text(&self, text: &str) -> Result<()> {
            let current = self
                .current
                .as_ref()
                .ok_or_else(|| RealtimeError::NotConnected("WebSocket not initialized".to_string()))?;

            if ReadyState::from_code(current.state.load(Ordering::SeqCst)) != ReadyState::Open {
                return Err(RealtimeError::NotConnected("socket is not open".to_string()));
            }

            current
                .outbound
                .send(Message::Text(text.to_string()))
                .map_err(|_| RealtimeError::NetworkError("WebSocket writer is gone".to_string()))
        }

        fn close(&mut self) -> Result<()> {
            // Задачу не abort'им: ей нужно дописать Close кадр
            if let Some(current) = self.current.take() {
                current.detach();
            }
            Ok(())
        }

        fn ready_state(&self) -> ReadyState {
            self.current
                .as_ref()
                .map(|current| ReadyState::from_code(current.state.load(Ordering::SeqCst)))
                .unwrap_or(ReadyState::Closed)
        }
    }
}
