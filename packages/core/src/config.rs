//! Централизованная конфигурация realtime-клиента
//!
//! Все константы канала (таймауты, backoff, адреса) определены здесь,
//! чтобы избежать хардкода по всему проекту.

use std::sync::OnceLock;

/// Глобальная конфигурация (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // АДРЕСА BACKEND
    // ============================================

    /// Базовый URL REST API (http/https). WebSocket адрес выводится из него.
    pub api_base_url: String,

    /// Префикс realtime endpoint: `{prefix}/{user_id}?token=...`
    pub ws_path_prefix: String,

    // ============================================
    // ИНДИКАТОР "ПЕЧАТАЕТ"
    // ============================================

    /// Через сколько миллисекунд чужой индикатор гаснет без новых кадров
    pub typing_expiry_ms: u64,

    /// Как часто отправитель повторяет `typing=true`, пока продолжает печатать
    pub typing_refresh_ms: u64,

    // ============================================
    // СЕТЕВЫЕ ПАРАМЕТРЫ
    // ============================================

    /// Начальная задержка для exponential backoff при переподключении (в миллисекундах)
    pub websocket_retry_initial_ms: u64,

    /// Максимальная задержка для exponential backoff (в миллисекундах)
    pub websocket_retry_max_ms: u64,

    /// Максимальное количество попыток переподключения подряд
    pub websocket_retry_max_attempts: u32,

    /// Включено ли автоматическое переподключение
    pub reconnect_enabled: bool,

    /// Интервал heartbeat кадров (сервер отвечает `pong`)
    pub heartbeat_interval_ms: u64,

    /// Таймаут REST запросов (только native, в браузере решает fetch)
    pub http_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_path_prefix: "/ws".to_string(),

            typing_expiry_ms: 3000,
            typing_refresh_ms: 2000,

            websocket_retry_initial_ms: 1000,
            websocket_retry_max_ms: 30000,
            websocket_retry_max_attempts: 5,
            reconnect_enabled: true,
            heartbeat_interval_ms: 25000,
            http_timeout_ms: 15000,
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Ok(val) = std::env::var("API_BASE_URL") {
            if !val.trim().is_empty() {
                config.api_base_url = val.trim().trim_end_matches('/').to_string();
            }
        }

        if let Ok(val) = std::env::var("TYPING_EXPIRY_MS") {
            if let Ok(parsed) = val.parse() {
                config.typing_expiry_ms = parsed;
            }
        }

        if let Ok(val) = std::env::var("WEBSOCKET_RETRY_MAX_MS") {
            if let Ok(parsed) = val.parse() {
                config.websocket_retry_max_ms = parsed;
            }
        }

        if let Ok(val) = std::env::var("WEBSOCKET_RETRY_MAX_ATTEMPTS") {
            if let Ok(parsed) = val.parse() {
                config.websocket_retry_max_attempts = parsed;
            }
        }

        if let Ok(val) = std::env::var("RECONNECT_ENABLED") {
            config.reconnect_enabled = !matches!(val.as_str(), "0" | "false" | "off");
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// При первом вызове читается из переменных окружения (в браузере их нет,
    /// остаются значения по умолчанию)
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::from_env)
    }
}
