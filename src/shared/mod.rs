//! Shared primitives and messaging
//!
//! Single-flight initialization used by the recognition adapter, and the
//! events the auto-capture loop sends to its host.

pub mod lazy;
pub mod messages;

pub use lazy::{InitError, LazyShared, LazyState, Released};
pub use messages::AutoCaptureEvent;
