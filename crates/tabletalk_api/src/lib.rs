//! Request/response types for the HTTP boundary, shared by the server and
//! the terminal client.

pub mod types;

pub use types::*;
