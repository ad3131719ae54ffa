pub mod commands;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use error::{Result, SupervisorError};
pub use state::AppState;
