//! Command handlers

pub mod chat;
pub mod close;
pub mod config;
pub mod threads;
