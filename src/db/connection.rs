use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::env;
use std::str::FromStr;

pub type Db = SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("WSI_DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string()),
            max_connections: env::var("WSI_DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }
}

impl DatabaseConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

    // An in-memory database lives exactly as long as its one connection.
    let pool = if config.is_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?
    };

    Ok(pool)
}

/// Create the SlideRunner tables this crate reads, if they are missing.
/// Existing SlideRunner databases are left untouched.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        "CREATE TABLE IF NOT EXISTS Slides (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            directory TEXT,
            uuid TEXT,
            exactImageID TEXT,
            EXACTUSER INTEGER DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS Classes (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            color TEXT
        )",
        "CREATE TABLE IF NOT EXISTS Annotations (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT,
            lastModified REAL DEFAULT 0,
            deleted INTEGER DEFAULT 0,
            slide INTEGER,
            type INTEGER,
            agreedClass INTEGER,
            description TEXT,
            clickable INTEGER DEFAULT 1
        )",
        "CREATE TABLE IF NOT EXISTS Annotations_coordinates (
            uid INTEGER PRIMARY KEY AUTOINCREMENT,
            coordinateX INTEGER,
            coordinateY INTEGER,
            coordinateZ INTEGER DEFAULT 0,
            slide INTEGER,
            annoId INTEGER,
            orderIdx INTEGER
        )",
        "CREATE INDEX IF NOT EXISTS annotation_slide ON Annotations (slide)",
        "CREATE INDEX IF NOT EXISTS coordinate_annotation ON Annotations_coordinates (annoId)",
    ];

    for query in schema_queries {
        sqlx::query(query).execute(db).await?;
    }

    Ok(())
}
