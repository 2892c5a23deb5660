//! Repository structs providing all SQL access.

mod audit_repo;
mod generation_repo;
mod ledger_repo;
mod provider_task_repo;

pub use audit_repo::AuditRepo;
pub use generation_repo::GenerationRepo;
pub use ledger_repo::LedgerRepo;
pub use provider_task_repo::ProviderTaskRepo;
