//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id and trace layers)
//!     → admission::pipeline (classify, circuit, quota)
//!     → upstream.rs (forward to the group's upstream)
//!     → response.rs (quota headers, denial bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use request::{GatewayRequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
pub use upstream::UpstreamForwarder;
