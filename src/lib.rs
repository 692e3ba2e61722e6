//! Two-call tool pipeline: a chat-completion request, an optional run on a
//! remote tool-execution service, and a second completion with the tool
//! result appended.

/// Remote service clients and wire types.
pub mod chat;
/// CLI subcommands.
pub mod commands;
/// Profile file and secrets loading.
pub mod config;
pub mod logging;
/// Stage-by-stage orchestration.
pub mod pipeline;
/// Page output.
pub mod render;
