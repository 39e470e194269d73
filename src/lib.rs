pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
