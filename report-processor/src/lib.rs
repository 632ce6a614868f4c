pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod metrics_consts;
pub mod processor;
pub mod publish;
pub mod server;
pub mod transform;
