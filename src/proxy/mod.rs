pub mod common;
pub mod config;
pub mod debug_logger;
pub mod errors;
pub mod handlers;
pub mod mappers;
pub mod server;
pub mod upstream;
