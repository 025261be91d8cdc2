//! Concrete implementations of consumers and of the trait combinators.

pub mod combinators;
pub mod consumers;

// Re-export commonly used implementations
pub use consumers::*;
