pub mod error;
pub mod types;

pub use error::{ErrorKind, Result, StoreError, WireError};
pub use types::{Entries, Method, StoreStats, to_object};
