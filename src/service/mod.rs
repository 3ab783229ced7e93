pub mod audit_job;
pub mod crawler;
pub mod executor;
pub mod queue;
pub mod session;

pub use audit_job::AuditJobRunner;
pub use crawler::{Crawler, HttpCrawler};
pub use executor::{AuditExecutor, AuditOutcome, AuditRequest, ExecutorDeps};
pub use queue::{JobQueue, QueueConfig};
pub use session::{SessionStatus, SessionStore, SessionUpdate};
