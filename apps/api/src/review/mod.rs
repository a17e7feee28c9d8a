// Card review: per-card status lifecycle, edits, LLM regeneration.
// Status changes only go through `ReviewStore::compare_and_set_status`.

pub mod handlers;
pub mod prompts;
pub mod rewrite;
pub mod service;
pub mod store;
