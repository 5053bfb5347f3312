pub mod buffers;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod error;
pub mod keyring;
pub mod logger;
pub mod reference;
pub mod session;
pub mod stream;
