//! Confab is a terminal conversation client that routes an operator's inline
//! command language between pluggable AI actors.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`repl`] parses and runs the command language typed by the operator,
//!   including the buffer and reference commands.
//! - [`core`] owns the conversation log, content streams, buffers, the error
//!   taxonomy and the [`core::session::Session`] loop that hands turns
//!   between actors.
//! - [`actor`] defines the [`actor::Actor`] trait and its implementations:
//!   the human operator, an offline dummy and an OpenAI-compatible backend.
//! - [`api`] defines chat and image payloads used by the backend actors.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which reads flags and configuration and then
//! runs a [`core::session::Session`].

pub mod actor;
pub mod api;
pub mod cli;
pub mod core;
pub mod repl;
pub mod utils;
