// Таймер браузера с владением
//
// `setTimeout` снимается в Drop: callback не переживет клиента, которому
// он принадлежит.

use crate::utils::error::{RealtimeError, Result};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

pub struct ScopedTimeout {
    handle: i32,
    _callback: Closure<dyn FnMut()>,
}

impl ScopedTimeout {
    /// Запланировать `f` через `delay_ms`
    ///
    /// `f` не должен синхронно уничтожать сам таймер: замену таймера
    /// выполняют из `spawn_local`, уже после выхода из callback'а.
    pub fn new(delay_ms: u64, f: impl FnOnce() + 'static) -> Result<Self> {
        let window = web_sys::window()
            .ok_or_else(|| RealtimeError::InternalError("window is not available".to_string()))?;

        let mut f = Some(f);
        let callback = Closure::wrap(Box::new(move || {
            if let Some(f) = f.take() {
                f();
            }
        }) as Box<dyn FnMut()>);

        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        let handle = window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                callback.as_ref().unchecked_ref(),
                delay,
            )
            .map_err(|e| RealtimeError::InternalError(format!("setTimeout failed: {:?}", e)))?;

        Ok(Self {
            handle,
            _callback: callback,
        })
    }
}

impl Drop for ScopedTimeout {
    fn drop(&mut self) {
        if let Some(window) = web_sys::window() {
            window.clear_timeout_with_handle(self.handle);
        }
    }
}
