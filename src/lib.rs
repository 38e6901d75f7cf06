pub mod aggregate;
pub mod app;
pub mod error;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod join;
pub mod output;
pub mod session;
pub mod table;
pub mod tui;
