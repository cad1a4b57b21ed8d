// ABOUTME: PostgreSQL connectivity for the dba commands
// ABOUTME: Re-exports the TLS-enabled connect helpers

pub mod connection;

pub use connection::{connect, connect_with_retry};
