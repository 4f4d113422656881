pub mod api;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod scheduler;
pub mod source;

pub use source::BalanceSource;
