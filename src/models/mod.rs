pub mod batch;
pub mod config_ref;
pub mod log_entry;
pub mod process_info;
pub mod settings;

pub use batch::*;
pub use config_ref::*;
pub use log_entry::*;
pub use process_info::*;
pub use settings::*;
