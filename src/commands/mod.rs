pub mod logs;
pub mod process;

pub use logs::*;
pub use process::*;
