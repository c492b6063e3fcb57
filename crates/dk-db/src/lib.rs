pub mod connection;
pub mod runs;

pub use connection::Database;
pub use runs::{RunRecord, RunRepository, RunStart, RunStats};
