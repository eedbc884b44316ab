/// In-process store used by tests.
pub mod memory;
/// Database model definitions.
pub mod models;
/// PostgreSQL backed store.
pub mod pg;
/// Storage error types.
pub mod storage;
/// Persistence traits implemented by every backend.
pub mod store;
