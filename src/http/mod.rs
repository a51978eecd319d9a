//! HTTP API server for external control
//!
//! This module provides a REST API over live conversation transcribers:
//! - POST /conversations - Create a transcriber for a WAV file and start it
//! - POST /conversations/:id/participants - Add a participant
//! - DELETE /conversations/:id/participants/:user_id - Remove a participant
//! - POST /conversations/:id/stop - Stop, close and report statistics
//! - GET /conversations/:id/status - Query session statistics
//! - GET /conversations/:id/transcript - Get accumulated transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
