//! Database access shared by the SQLite-backed store

pub mod init;

pub use init::init_database;
