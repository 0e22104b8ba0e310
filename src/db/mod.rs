pub mod connection;
pub mod error;
pub mod executor;
pub mod retry;

pub use connection::{ConnectionHealth, ConnectionManager, ConnectionState, PoolStats};
pub use error::{DbError, DbResult, ErrorKind};
pub use executor::{QueryExecutor, Reconnect};
pub use retry::{Jitter, RetryConfig};
