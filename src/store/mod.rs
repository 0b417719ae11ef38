//! Per-fragment storage: value arrays and message slots.

pub mod array;
pub mod message;

pub use array::ArrayStore;
pub use message::MessageStore;
