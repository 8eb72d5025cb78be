//! Application services: the compilation job runner and error mapping.

pub mod compile;
pub mod error;
