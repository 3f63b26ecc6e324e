use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context as _, bail};
use rusqlite::{Connection, OpenFlags, OptionalExtension as _, params};

use crate::config::Config;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only handle on the session table of an SQLite database.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    db_path: PathBuf,
    table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_key: String,
    pub session_data: Vec<u8>,
    /// Carried along for completeness; the analysis never looks at it.
    pub expire_date: Option<String>,
}

impl SessionRecord {
    pub fn encoded_size(&self) -> usize {
        self.session_data.len()
    }
}

impl SessionStore {
    pub fn from_config(config: &Config, path_override: Option<&Path>) -> anyhow::Result<Self> {
        let Some(db_path) = path_override.or(config.database.path.as_deref()) else {
            bail!("database not configured; set `[database].path` in config or pass `--database`");
        };
        Self::open(db_path.to_path_buf(), config.session_table())
    }

    pub fn open(db_path: PathBuf, table: &str) -> anyhow::Result<Self> {
        validate_table_name(table)?;
        if !db_path.is_file() {
            bail!("session database {} does not exist", db_path.display());
        }

        let store = Self {
            inner: Arc::new(StoreInner {
                db_path,
                table: table.to_owned(),
            }),
        };
        store.check_table()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub async fn count_all(&self) -> anyhow::Result<u64> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || count_all_blocking(&inner))
            .await
            .context("join count_all task")?
    }

    pub async fn count_bigger_than(&self, threshold: u64) -> anyhow::Result<u64> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || count_bigger_than_blocking(&inner, threshold))
            .await
            .context("join count_bigger_than task")?
    }

    /// Up to `limit` rows bigger than `threshold` bytes, ordered by session key
    /// and strictly after `after` when given.
    pub async fn fetch_page_bigger_than(
        &self,
        threshold: u64,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<SessionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = Arc::clone(&self.inner);
        let after = after.map(ToOwned::to_owned);
        let threshold = sql_int(threshold).context("size threshold exceeds sqlite range")?;
        let limit = i64::try_from(limit).context("page size exceeds sqlite range")?;
        tokio::task::spawn_blocking(move || {
            fetch_page_bigger_than_blocking(&inner, threshold, after.as_deref(), limit)
        })
        .await
        .context("join fetch_page_bigger_than task")?
    }

    pub async fn get(&self, session_key: &str) -> anyhow::Result<Option<SessionRecord>> {
        let inner = Arc::clone(&self.inner);
        let session_key = session_key.to_owned();
        tokio::task::spawn_blocking(move || get_blocking(&inner, &session_key))
            .await
            .context("join get session task")?
    }

    fn check_table(&self) -> anyhow::Result<()> {
        let conn = open_connection(&self.inner.db_path)?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                params![self.inner.table],
                |_| Ok(()),
            )
            .optional()
            .context("look up session table")?
            .is_some();
        if !exists {
            bail!(
                "table `{}` not found in {}",
                self.inner.table,
                self.inner.db_path.display()
            );
        }
        Ok(())
    }
}

fn validate_table_name(table: &str) -> anyhow::Result<()> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if !valid_start || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        bail!("invalid session table name `{table}`; expected [A-Za-z_][A-Za-z0-9_]*");
    }
    Ok(())
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("open sqlite {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("set sqlite busy_timeout")?;
    Ok(conn)
}

fn sql_int(value: u64) -> anyhow::Result<i64> {
    i64::try_from(value).map_err(Into::into)
}

fn sql_count(count: i64) -> anyhow::Result<u64> {
    u64::try_from(count).context("negative row count")
}

fn count_all_blocking(store: &StoreInner) -> anyhow::Result<u64> {
    let conn = open_connection(&store.db_path)?;
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", store.table), [], |row| {
            row.get(0)
        })
        .context("count sessions")?;
    sql_count(count)
}

fn count_bigger_than_blocking(store: &StoreInner, threshold: u64) -> anyhow::Result<u64> {
    let conn = open_connection(&store.db_path)?;
    let threshold = sql_int(threshold).context("size threshold exceeds sqlite range")?;
    let count: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM \"{}\" WHERE length(CAST(session_data AS BLOB)) > ?1",
                store.table
            ),
            params![threshold],
            |row| row.get(0),
        )
        .context("count sessions bigger than threshold")?;
    sql_count(count)
}

fn fetch_page_bigger_than_blocking(
    store: &StoreInner,
    threshold: i64,
    after: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<SessionRecord>> {
    let conn = open_connection(&store.db_path)?;
    let mut stmt = conn
        .prepare(&format!(
            r#"
            SELECT
              session_key,
              CAST(session_data AS BLOB),
              CAST(expire_date AS TEXT)
            FROM "{}"
            WHERE length(CAST(session_data AS BLOB)) > ?1
              AND (?2 IS NULL OR session_key > ?2)
            ORDER BY session_key
            LIMIT ?3
            "#,
            store.table
        ))
        .context("prepare fetch session page")?;

    let mut rows = stmt
        .query(params![threshold, after, limit])
        .context("query session page")?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().context("iterate session page")? {
        records.push(deserialize_record(row)?);
    }
    Ok(records)
}

fn get_blocking(store: &StoreInner, session_key: &str) -> anyhow::Result<Option<SessionRecord>> {
    let conn = open_connection(&store.db_path)?;
    let mut stmt = conn
        .prepare(&format!(
            r#"
            SELECT
              session_key,
              CAST(session_data AS BLOB),
              CAST(expire_date AS TEXT)
            FROM "{}"
            WHERE session_key = ?1
            "#,
            store.table
        ))
        .context("prepare get session")?;

    let mut rows = stmt
        .query(params![session_key])
        .context("query session by key")?;
    let Some(row) = rows.next().context("iterate session by key")? else {
        return Ok(None);
    };
    Ok(Some(deserialize_record(row)?))
}

fn deserialize_record(row: &rusqlite::Row<'_>) -> anyhow::Result<SessionRecord> {
    let session_key = row
        .get::<_, String>(0)
        .context("deserialize session_key")?;
    let session_data = row
        .get::<_, Option<Vec<u8>>>(1)
        .context("deserialize session_data")?
        .unwrap_or_default();
    let expire_date = row
        .get::<_, Option<String>>(2)
        .context("deserialize expire_date")?;

    Ok(SessionRecord {
        session_key,
        session_data,
        expire_date,
    })
}
