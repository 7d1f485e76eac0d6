/// Reusable Discord interactions used by commands.
pub mod discord;
/// Errors of the command layer.
pub mod error;
/// Shorthands on the command context.
pub mod shorthand;
