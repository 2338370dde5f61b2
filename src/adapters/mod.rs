//! Storage adapters implementing [`crate::ports::EscrowStore`].

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryEscrowStore, WriteKind};
pub use postgres::PostgresEscrowStore;
