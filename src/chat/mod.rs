//! Remote chat plumbing.
//!
//! Typed wrappers for the chat-completion endpoint, the tool-execution
//! service, and the role-tagged messages exchanged between them.

/// Chat-completion client and response model.
pub mod completion;
/// Role-tagged conversation messages.
pub mod message;
/// Tool-execution service client.
pub mod toolhouse;
pub(crate) mod transport;
