//! Toolgate Gateway
//!
//! Tool-call gateway that provides:
//! - Supervised connections to local-process and streaming-http backends
//! - Session-expiry recovery and legacy transport fallback
//! - Bearer-token credential management with silent refresh
//! - Tool catalog caching with bounded retry
//! - Per-caller secret filtering on invocation

pub mod pool;
pub mod protocol;
pub mod server;
pub mod transport;

pub use pool::{
    BackendInstance, BackendRegistry, BackendView, CatalogConfig, CatalogEntry, CatalogFetcher,
    ConnectionSupervisor, ConnectionTable, CredentialProvider, InvocationRouter, LiveConnection,
    RegistryError, SupervisorConfig,
};
pub use protocol::{ProtocolClient, RpcError, RpcRequest, RpcResponse, TransportEvent};
pub use server::{build_router, AppState};
pub use transport::{Established, Transport, TransportFactory, TransportOptions};
