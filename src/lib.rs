pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod logging;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod utils;
