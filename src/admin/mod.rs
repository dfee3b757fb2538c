//! Admin surface served on the separate admin listener.

pub mod performance;

pub use performance::create_performance_routes;
