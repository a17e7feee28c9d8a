pub mod card;
pub mod job;
pub mod repo;
pub mod settings;
pub mod user;
