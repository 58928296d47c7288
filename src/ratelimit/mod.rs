//! Rate limiting logic and state management.

mod bucket;
mod client;
mod registry;

pub use bucket::{InitialFill, LimiterSettings, TokenBucket, DEFAULT_BURST, DEFAULT_RATE};
pub use client::{split_host_port, AddressError, ClientKey};
pub use registry::{ClientRegistry, LocalRegistry, RegistryKind, ShardedRegistry};

/// Registry handle shared between the server and every request.
pub type SharedRegistry = std::sync::Arc<dyn ClientRegistry>;
