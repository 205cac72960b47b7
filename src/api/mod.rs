//! HTTP API endpoints for the wellness economy
//!
//! Provides REST APIs for:
//! - Reward events and wallet reads
//! - Micro-loans and credit history
//! - The top-comment board
//! - Request logging and response header middleware

pub mod economy;
pub mod middleware;

pub use economy::{ApiError, EconomyApiState, ErrorBody, create_router as create_economy_router};
pub use middleware::{RequestLogging, logging_middleware, security_headers_middleware};
