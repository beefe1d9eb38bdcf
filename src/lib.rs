//! Ask a database questions in plain language, approving each drafted SQL
//! query before it runs.

pub mod app;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod services;
