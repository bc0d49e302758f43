//! # pmoserver - high-level web server on top of Axum
//!
//! Hosts the PMORelay HTTP surface: the audio stream, the JSON APIs with
//! their Swagger UI, and the log endpoints.
//!
//! ## Modules
//!
//! - [`server`]: the server and its builder
//! - [`logs`]: tracing setup, in-memory log buffer and the log level API
//!
//! ## Example
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyRelay", "http://localhost:8080", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await;
//!
//!     server.add_route("/api/ping", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{BufferLayer, LogState, LoggingOptions, init_logging, log_dump};
pub use server::{DEFAULT_SERVER_NAME, Server, ServerBuilder, ServerInfo};
