//! crmdesk: data core for a CRM front-end.
//!
//! Entity services for contacts, deals and tasks sit on a `RecordStore`
//! (hosted table API or in-memory). Around them: the query builder that turns
//! screen filters into table predicates, client-side filtering and sorting,
//! and pipeline/task rollups.

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod filter;
pub mod query;
pub mod services;
pub mod state;
pub mod store;
pub mod types;

pub use error::{CrmError, CrmResult, ServiceError};
pub use state::CrmState;

/// Install the `env_logger` backend. Defaults to `info`; `RUST_LOG` overrides.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
