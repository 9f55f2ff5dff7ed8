pub mod config;
pub mod constants;
pub mod cron;
pub mod database;
pub mod dispatcher;
pub mod errors;
pub mod invoker;
pub mod maintenance;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use dispatcher::{Dispatcher, SchedulerStats};
pub use errors::{CoreError, CoreResult};
pub use invoker::HttpInvoker;
pub use maintenance::Maintenance;
