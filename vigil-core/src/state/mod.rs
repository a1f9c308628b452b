pub mod connection;

pub use connection::{BackoffPolicy, ConnectionPhase, ConnectionState, RetryDecision};
