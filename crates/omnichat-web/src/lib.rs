//! omnichat web front-end
//!
//! An axum server that renders one chat page per browser session, collects
//! the API key and generation parameters from form fields, and streams
//! assistant replies back over server-sent events.

pub mod error;
pub mod http;
pub mod render;
pub mod session;

pub use error::ApiError;
pub use http::{router, AppState};
pub use session::{ChatSession, SessionDefaults, SessionRegistry};
