// Concrete implementations of the domain ports.

pub mod memory;
pub mod postgres;
pub mod trongrid;

pub use memory::InMemoryNoticeStore;
pub use postgres::PgNoticeStore;
pub use trongrid::{TronGridClient, TronGridSettings};
