//! Core domain entities.

mod backend;
mod credential;
mod diagnostics;

pub use backend::{
    BackendConfig, BackendStatus, BackendUpdate, ReconnectPolicy, Tool, TransportConfig,
    TransportKind, RESERVED_BACKENDS,
};
pub use credential::CredentialRecord;
pub use diagnostics::DiagnosticBuffer;
