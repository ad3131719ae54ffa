pub mod executable;
pub mod log_file_name;
pub mod signals;

pub use executable::*;
pub use log_file_name::*;
pub use signals::*;
