pub mod audit;
pub mod state;
pub mod worker;

pub use audit::{audit_ledger, AuditReport};
pub use state::AppState;
