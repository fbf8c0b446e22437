// WASM bindings

pub mod timer;
pub mod wasm_api;
