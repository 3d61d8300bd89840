pub mod config;
pub mod error;
pub mod participant;
pub mod server;
pub mod settings;
pub mod wallet_commands;
