// Realtime канал: соединение, входящие кадры, исходящие команды, "печатает"

pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod typing;
