pub mod handlers;
pub mod selector;
pub mod service;
pub mod store;
pub mod worker;
