//! Resolver resolves references against live cluster state (§4.3.1), runs the readiness engine
//! (§4.4), and hydrates a composition's projected status from deployed resources (§4.5).
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod hydrate;
mod readiness;
mod resolve;

pub use hydrate::{hydrate_status, HydrationError};
pub use readiness::{check_readiness, poll_until_ready, ReadinessError, READINESS_POLL_INTERVAL};
pub use resolve::{project_path, LiveSnapshot, ResolverError};
