//! HTTP control API
//!
//! This module provides a REST API for driving capture sessions:
//! - POST /sessions - Create a session and prime its reference video
//! - POST /sessions/:id/start - Start capture
//! - GET /sessions/:id/status - Query the session snapshot
//! - GET /sessions/:id/recording - Download the finished recording
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, DeviceFactory};
