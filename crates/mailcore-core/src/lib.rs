pub mod config;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod scheduler;
pub mod sqlite;
pub mod workers;
