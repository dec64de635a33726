//! leadbot — conversational lead intake and broadcast bot.

pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod flows;
pub mod messenger;
pub mod scheduler;
pub mod store;
