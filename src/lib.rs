pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod dependencies;
pub mod error;
pub mod fanout;
pub mod jobs;
pub mod jsr;
pub mod lifecycle;
pub mod models;
pub mod reminders;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
