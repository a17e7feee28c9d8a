pub mod converter;
pub mod export;
pub mod handlers;
pub mod registry;
pub mod store;
