pub mod error;
pub mod types;
pub mod value;

pub use error::{EntityKey, FailureSet, FieldError, NestError, Result};
pub use types::{EntityId, FieldMap, Record};
pub use value::{DataType, Value};
