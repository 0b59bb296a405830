#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod feed;
pub mod logging;
pub mod media;
pub mod session;
pub mod store;
pub mod transport;
pub mod ui;
pub mod video;
pub mod viewport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
