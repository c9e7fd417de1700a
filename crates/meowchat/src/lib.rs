//! meowchat: a multi-user telnet chat room.
//!
//! A connection walks a small menu, logs in or registers against an [`auth::AuthStore`],
//! then joins the shared room held by [`hub::Hub`]. Every chat line is appended to one log
//! and every connected terminal is repainted from it.

pub mod auth;
pub mod commands;
pub mod config;
pub mod hub;
pub mod registry;
pub mod render;
pub mod session;
pub mod stock;

pub use auth::{AccountsFile, AuthStore};
pub use commands::{CommandContext, CommandHandler, CommandLoader, CommandTable, LoadedCommand};
pub use config::{ConfigSource, JsonConfig, Settings};
pub use hub::Hub;
pub use session::{handle_conn, serve};
