pub mod config_store;
pub mod log_archiver;
pub mod log_pipe;
pub mod log_sink;
pub mod process_gateway;
pub mod registry;
pub mod settings_store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config_store::*;
pub use log_archiver::*;
pub use log_pipe::*;
pub use log_sink::*;
pub use process_gateway::*;
pub use registry::*;
pub use settings_store::*;
pub use supervisor::*;
