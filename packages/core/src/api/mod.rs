// Публичный API клиента
// REST бэкенда и высокоуровневый ChatClient

pub mod client;
pub mod rest;

pub use client::ChatClient;
pub use rest::{HttpRestClient, RestApi};
