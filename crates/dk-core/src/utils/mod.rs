pub mod retry;
pub mod shutdown;

pub use retry::{with_retry, RetryConfig};
pub use shutdown::CancellationSignal;
