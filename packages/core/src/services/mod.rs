pub mod koios;

#[cfg(test)]
pub mod mock_koios;

pub use koios::{ApiCall, ApiResponse, ClientOptions, HttpMethod, KoiosClient, KoiosTransport};
