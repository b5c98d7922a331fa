pub mod json;
pub mod retry;

pub use json::{infer_fields, strict_decode};
pub use retry::with_retry;
