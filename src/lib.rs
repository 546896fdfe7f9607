pub mod cache;
pub mod config;
pub mod error;
pub mod providers;
pub mod registry;
pub mod router;
pub mod server;
pub mod translate;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use registry::ProviderRegistry;
pub use router::ModelRouter;
pub use server::{build_router, AppState};
