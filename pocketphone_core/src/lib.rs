//! Core of the in-chat phone: turns generated text into structured phone
//! content and keeps unread counters and app navigation consistent.

pub mod attacher;
pub mod chat;
pub mod clock;
pub mod config;
pub mod events;
pub mod generation;
pub mod integration;
pub mod moments;
pub mod navigation;
pub mod parser;
pub mod records;
pub mod runtime;
pub mod store;
pub mod unread;
