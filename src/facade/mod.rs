pub mod request;
pub mod writer;

pub use request::{Nested, ParentGraph, SaveRequest};
pub use writer::NestedWriter;
