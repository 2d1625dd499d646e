// Library entry point for chat-vm
// Exposes modules for testing

pub mod api;
pub mod auth;
pub mod blob;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod store;
