/// This module contains the customer CSV reader.
pub mod csv;

/// This module contains a logger item writer implementation.
#[cfg(feature = "logger")]
pub mod logger;

/// This module contains the SQLite item writer implementation.
#[cfg(feature = "rdbc-sqlite")]
pub mod rdbc;
