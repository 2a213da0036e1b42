pub mod config;
pub mod engine;
pub mod export;
pub mod history;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod session;
pub mod sync;
