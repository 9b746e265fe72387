pub mod http;

pub use http::HttpPushProvider;
