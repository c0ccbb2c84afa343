//! Local HTTP/SSE surface
//!
//! Read access to the published bucket views, session status, queue
//! actions forwarded to the backend, and an SSE stream of engine events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, AppContext};
