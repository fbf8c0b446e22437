// Протокол realtime канала: типы кадров, JSON wire format, транспорт

pub mod messages;
pub mod transport;
pub mod wire;
