pub mod client;
pub mod signing;
pub mod stream;
pub mod types;

pub use client::RestExchangeClient;
pub use stream::TungsteniteUserStream;
