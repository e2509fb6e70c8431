pub mod controller;
pub mod identity;
pub mod mode;
pub mod pg_identity;
pub mod rate_limit;

pub use controller::{AdmissionController, AdmissionTicket};
pub use identity::{CachingIdentitySource, FakeIdentitySource, IdentitySource};
pub use mode::Mode;
pub use pg_identity::PgIdentitySource;
pub use rate_limit::RateLimiterRegistry;
