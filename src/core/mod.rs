pub mod config;
pub mod error;
pub mod sweeper;

pub use config::ShieldConfig;
pub use error::{ShieldError, ShieldResult};
pub use sweeper::{BackgroundSweeper, Sweep};
