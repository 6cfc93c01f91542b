pub mod audit;
pub mod error;
pub mod sanitize;
pub mod types;
