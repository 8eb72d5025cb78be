//! latexd: compiles LaTeX sources into PDF documents on demand.
//!
//! The crate is split the same way the binary is wired: `domain` holds the
//! pure job model, `application` runs jobs and maps failures, `infra` carries
//! the HTTP surface and telemetry, and `config` resolves layered settings.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
