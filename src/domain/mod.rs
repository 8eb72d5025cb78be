//! Core types of a compilation job, free of I/O.

pub mod job;
