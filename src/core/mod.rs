// Core Layer: errors and reference values
//
// Shared by the IR, the rewrite engine and the interpreter

pub mod error;
pub mod tensor;

// Re-export commonly used types
pub use error::{ErrorKind, GraphError, Result};
pub use tensor::Tensor;
