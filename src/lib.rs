pub mod adapter;
pub mod config;
pub mod drivers;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod rpc;
pub mod signer;
pub mod subscription;
pub mod types;

pub use adapter::Adapter;
pub use error::{ChainError, ChainResult, Classification};
pub use registry::{ChainDriver, Registry};

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber: reads `RUST_LOG` for filter
/// directives, falling back to `"chain_adapter=info"`.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chain_adapter=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
