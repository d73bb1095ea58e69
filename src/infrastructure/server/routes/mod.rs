pub mod bridge;
pub mod chat;
pub mod health;
