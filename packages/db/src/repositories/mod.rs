//! Repository implementations for database operations.

mod post_repo;

pub use post_repo::{AudioPost, PostRepository};
