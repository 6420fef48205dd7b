pub mod billing_repository;
pub mod memory_billing_repository;

pub use billing_repository::{BillingRepository, RepositoryError};
pub use memory_billing_repository::InMemoryBillingRepository;
