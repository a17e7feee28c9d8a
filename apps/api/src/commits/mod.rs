pub mod git;
pub mod handlers;
