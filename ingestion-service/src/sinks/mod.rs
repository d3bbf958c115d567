pub mod mysql;

pub use mysql::{MySqlUsageSink, StorageError};
