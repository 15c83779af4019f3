use db::{DbConfig, DbError, PostRepository};

/// A repository over a fresh in-memory database with the schema applied.
pub async fn setup_repo() -> Result<PostRepository, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(PostRepository::new(db))
}
