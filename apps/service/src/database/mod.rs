/// Database abstraction layer
///
/// Sites, their headers and validation history live in a local LibSQL
/// (SQLite) file behind a connection pool.
pub mod migrations;
pub mod repository;

pub use repository::SiteRepository;

use std::path::Path;

use anyhow::Result;

use crate::pool::open_pool;

/// Open the database at `path`, bring its schema up to date and wrap it in
/// a repository
pub async fn open_database(path: &Path, max_connections: usize) -> Result<SiteRepository> {
    let pool = open_pool(path, max_connections).await?;
    {
        let conn = pool.get().await?;
        migrations::run_migrations(&conn).await?;
    }
    Ok(SiteRepository::new(pool))
}
