//! # Taskboard
//!
//! A task management HTTP API built on Axum, featuring:
//!
//! - **Tasks**: CRUD with soft delete, restore and permanent delete,
//!   filtering, search, sorting and pagination (SQLite via sqlx)
//! - **Audit trail**: every mutation recorded as a `TaskLog` document in
//!   Apache Iggy (or an in-memory store)
//! - **Security**: fixed-window rate limiting, SQL-injection screening,
//!   security headers
//! - **Observability**: request ids, structured logging, Prometheus metrics,
//!   health endpoints
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Headers → Trace → Metrics →       │
//! │              Rate Limit → Threat Guard → CORS → Body Limit) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, tasks, logs)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TaskService (validation, audit logging)                    │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  TaskRepository (SQLite)     │  AuditLogStore (Iggy/memory) │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskboard::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config).await?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Run without an Iggy server:
//! ```bash
//! AUDIT_STORE=memory cargo run
//! ```
//!
//! Tighten rate limits:
//! ```bash
//! RATE_LIMIT_MAX_REQUESTS=30 RATE_LIMIT_WRITE_MAX_REQUESTS=10 cargo run
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
