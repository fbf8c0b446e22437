// Состояние клиента (только в памяти)

pub mod conversations;
pub mod events;
pub mod models;
pub mod session;
