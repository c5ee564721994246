//! IPC: s-expression protocol over stdio.
//!
//! Each request is one plist on its own line; each response is one line.

pub mod dispatch;
pub mod server;

pub use server::{serve, ServerOptions};
