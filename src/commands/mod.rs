pub mod bootstrap;
pub mod cache;
pub mod config;
