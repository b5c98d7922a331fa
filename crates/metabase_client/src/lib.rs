pub mod http_client;

pub use http_client::client::{build_http_client, MetabaseClient};
