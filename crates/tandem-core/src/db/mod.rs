//! Database layer for tandem

mod connection;
mod mapping_repository;
mod migrations;
mod queue_repository;

pub use connection::Database;
pub use mapping_repository::{LibSqlMappingRepository, MappingRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
