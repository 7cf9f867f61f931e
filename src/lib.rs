pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod module;
pub mod modules;
pub mod net;
pub mod output;
pub mod privilege;
pub mod store;
pub mod task;
