//! Backend pool - supervised connection management.
//!
//! - **ConnectionSupervisor**: drives the connect state machine and the
//!   fallback ladder (session retry, legacy transport, reinstall)
//! - **CredentialProvider**: bearer tokens with silent refresh
//! - **CatalogFetcher**: tool discovery with bounded retry
//! - **InvocationRouter**: dispatches tool calls with per-caller secret
//!   filtering
//! - **BackendRegistry**: configuration CRUD with validation

mod catalog;
mod credentials;
mod instance;
mod registry;
mod router;
mod supervisor;

pub use catalog::{CatalogConfig, CatalogFetcher};
pub use credentials::CredentialProvider;
pub use instance::{BackendInstance, ConnectionTable, LiveConnection};
pub use registry::{BackendRegistry, BackendView, RegistryError};
pub use router::{CatalogEntry, InvocationRouter};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
