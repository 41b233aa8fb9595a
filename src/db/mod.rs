//! Database connection and EPG program repository
//!
//! MediaPortal keeps its EPG in the `program` table of a MySQL database.
//! Candidate rows are series recordings (description starts with the
//! configured series indicator) that do not carry a season number yet;
//! making-of specials are excluded by title suffix.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

/// One EPG program row that is a candidate for number resolution
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProgramRecord {
    pub program_id: i32,
    pub title: String,
    pub episode_name: String,
    pub description: String,
    /// Full air date as text; the first four characters are the air year
    pub original_air_date: String,
}

/// Read/write access to the EPG table, abstracted so tests can run the
/// scan against an in-memory store.
#[async_trait]
pub trait EpgStore: Send + Sync {
    /// Number of candidate rows for the given series indicator
    async fn count_candidates(&self, series_indicator: &str) -> Result<i64>;

    /// All candidate rows, ordered by title so that rows of one series
    /// form a contiguous run
    async fn fetch_candidates(&self, series_indicator: &str) -> Result<Vec<ProgramRecord>>;

    /// Write resolved numbers back to one program row
    async fn update_episode_numbers(
        &self,
        program_id: i32,
        season: &str,
        episode: &str,
    ) -> Result<()>;
}

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: MySqlPool,
    making_of_suffix: String,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(url: &str, making_of_suffix: &str) -> Result<Self> {
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self {
            pool,
            making_of_suffix: making_of_suffix.to_string(),
        })
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl EpgStore for Database {
    async fn count_candidates(&self, series_indicator: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM program
            WHERE seriesNum = '' AND description LIKE ? AND title NOT LIKE ?
            "#,
        )
        .bind(format!("{series_indicator}%"))
        .bind(format!("%{}", self.making_of_suffix))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn fetch_candidates(&self, series_indicator: &str) -> Result<Vec<ProgramRecord>> {
        let records = sqlx::query_as::<_, ProgramRecord>(
            r#"
            SELECT idProgram AS program_id,
                   title,
                   episodeName AS episode_name,
                   description,
                   CAST(originalAirDate AS CHAR) AS original_air_date
            FROM program
            WHERE seriesNum = '' AND description LIKE ? AND title NOT LIKE ?
            ORDER BY title
            "#,
        )
        .bind(format!("{series_indicator}%"))
        .bind(format!("%{}", self.making_of_suffix))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update_episode_numbers(
        &self,
        program_id: i32,
        season: &str,
        episode: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE program SET seriesNum = ?, episodeNum = ? WHERE idProgram = ?
            "#,
        )
        .bind(season)
        .bind(episode)
        .bind(program_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
