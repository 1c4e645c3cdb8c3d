//! Connection pools for the checkpoint database.
//!
//! SQLite serializes writers, so every checkpoint mutation goes through a
//! one-connection writer pool; `status` and `recover` listings read through a
//! separate read-only pool that WAL lets run alongside the writer.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const READER_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct CheckpointDb {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl CheckpointDb {
    /// Open (creating if needed) the database at `url` and apply pending
    /// migrations before any reader connects.
    ///
    /// `synchronous = FULL`: a commit that returned is on disk.
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = connect_options(url)?;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(url, "checkpoint database ready");
        Ok(Self { reader, writer })
    }

    /// Close both pools, waiting for checked-out connections.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
    }
}

fn connect_options(url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT))
}
