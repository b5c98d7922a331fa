pub mod filter;
pub mod format;

pub use filter::*;
pub use format::*;
