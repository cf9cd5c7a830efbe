pub mod chat;
pub mod health;
pub mod ids;
pub mod stream;
pub mod threads;
