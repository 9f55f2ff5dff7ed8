//! Web surface
//!
//! Only the two read-only probes the external API collaborator expects:
//! liveness and scheduler statistics. The REST CRUD surface lives outside
//! this process.

pub mod handlers;
pub mod server;

pub use server::start_web_server;

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::database::Database;
use crate::dispatcher::Dispatcher;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: Arc<Config>, database: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            database,
            dispatcher,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type ApiResult<T> = Result<
    axum::Json<ApiResponse<T>>,
    (axum::http::StatusCode, axum::Json<ApiResponse<T>>),
>;
