//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(POST_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Post table schema. A post owns one uploaded track and its processing outcome.
const POST_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS post SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS post_id ON post TYPE string;
DEFINE FIELD IF NOT EXISTS owner_id ON post TYPE string;
DEFINE FIELD IF NOT EXISTS title ON post TYPE option<string>;
DEFINE FIELD IF NOT EXISTS audio_status ON post TYPE string DEFAULT "pending";
DEFINE FIELD IF NOT EXISTS audio_url ON post TYPE option<string>;
DEFINE FIELD IF NOT EXISTS waveform_url ON post TYPE option<string>;
DEFINE FIELD IF NOT EXISTS duration_secs ON post TYPE option<float>;
DEFINE FIELD IF NOT EXISTS sample_rate ON post TYPE option<int>;
DEFINE FIELD IF NOT EXISTS file_size ON post TYPE option<int>;
DEFINE FIELD IF NOT EXISTS created_at ON post TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON post TYPE string;

DEFINE INDEX IF NOT EXISTS post_owner ON post FIELDS owner_id;
DEFINE INDEX IF NOT EXISTS post_audio_status ON post FIELDS audio_status;
"#;
