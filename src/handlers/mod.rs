//! HTTP and WebSocket request handlers
//!
//! This module organizes all handlers into logical groups:
//! - `intercept` - Fallback interception serving cached resources
//! - `store` - Durable record store endpoints
//! - `status` - Gateway status endpoint
//! - `control` - WebSocket lifecycle control channel

pub mod control;
pub mod intercept;
pub mod status;
pub mod store;

// Re-export commonly used handlers for convenient access
pub use control::ws_control_handler;
pub use intercept::intercept;
