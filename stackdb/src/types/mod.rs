//! Primitive value types shared by the storage and tree layers.

mod value128;

pub use value128::{VALUE128_SIZE, Value128};
