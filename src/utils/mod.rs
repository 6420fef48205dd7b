pub mod idempotency;
pub mod origin;
pub mod retry;
