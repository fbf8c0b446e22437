// Логирование
//
// Весь крейт пишет через `tracing`. Здесь только инициализация подписчика:
// native -> stderr с фильтром из RUST_LOG, WASM -> консоль браузера.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Уровень по умолчанию, если RUST_LOG не задан
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Инициализировать логирование. Повторные вызовы игнорируются.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .try_init();
    });
}

/// Инициализировать логирование (WASM): вывод в console, без timestamp
#[cfg(target_arch = "wasm32")]
pub fn init_logging() {
    INIT.call_once(|| {
        console_error_panic_hook::set_once();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .without_time()
            .with_writer(|| ConsoleWriter)
            .try_init();
    });
}

/// Writer, который отдает отформатированную строку в `console.log`
#[cfg(target_arch = "wasm32")]
struct ConsoleWriter;

#[cfg(target_arch = "wasm32")]
impl std::io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        web_sys::console::log_1(&line.trim_end().into());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
