pub mod engine;
pub mod memory;
pub mod table;

pub use engine::Store;
pub use memory::{InMemoryStore, StoreStats, WriteOp};
pub use table::{Table, TableDef};
