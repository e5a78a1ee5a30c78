pub mod client;
pub mod dht;
pub mod transport;

pub use client::Client;
pub use transport::Transport;
