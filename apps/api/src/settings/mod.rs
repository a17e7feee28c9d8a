pub mod handlers;
pub mod notes_config;
pub mod store;
