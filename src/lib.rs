//! conbridge - console driver protocol and pseudo console bridge
//!
//! # Modules
//!
//! - **condrv**: `\Device\ConDrv` control codes and request/reply layouts
//! - **conmsg**: console API table and typed message bodies
//! - **server**: object table and request dispatch for a console server
//! - **core**: headless conhost launcher, signal pipe, environment blocks
//! - **bridge**: runs the current console through a hosted conhost
//! - **config**: `~/.conbridge/config.toml`

pub mod bridge;
pub mod condrv;
pub mod config;
pub mod conmsg;
pub mod core;
pub mod server;
