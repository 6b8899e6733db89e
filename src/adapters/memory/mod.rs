//! In-memory backend for tests and dry runs

pub mod backend;

pub use backend::MemoryBackend;
