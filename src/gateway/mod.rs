//! Server assembly: shared state, routers and the listener lifecycle.

pub mod server;

pub use server::{build_admin_router, build_router, health_check, AppState, Shield};
