//! Storage module for relay persistence

pub mod persistence;

pub use persistence::{load_from_file, PersistedState, Storage, StorageConfig, StorageError};
