pub mod connection;
pub mod pending;

pub use connection::ConnectionPhase;
pub use pending::{Continuation, CorrelationTable, Outcome, PendingRequest};
