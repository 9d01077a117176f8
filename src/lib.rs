pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use shared::{Result, SyncConfig, SyncError};
pub use state::SyncCore;

/// Initialize tracing for embedding applications. Honors `RUST_LOG` when set.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_sync=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
