pub mod logger;
pub mod middleware;

pub use gatekeeper_core::recording::*;
pub use logger::RecordingLogger;
pub use middleware::RecordingMiddleware;
