pub mod clock;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod server;
pub mod service;
pub mod store;
pub mod sweeper;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: service::SecretService,
}

pub use error::{Result, SecretError};
pub use server::{open_service, resolve_data_dir, router, run, ServerConfig};
pub use service::SecretService;
pub use store::{Backend, Scheme, SecretId, SecretStore};
pub use sweeper::{spawn_sweeper, SweeperHandle};
