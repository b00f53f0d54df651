//! Daemon side of gbfs: configuration, concrete sources, the refresh task
//! and the FUSE adapter around [`common::FsEngine`].

pub mod config;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod observability;
pub mod process;
pub mod sources;

pub use config::{Config, ConfigError};
pub use process::{build_engine, spawn_refresh_loop, RefreshHandle};
