use crate::domain::Session;
use anyhow::Context;
use chrono::{Datelike, NaiveDate};

// Advisory locks are scoped to the Postgres session. One key per
// (as_of_date, session) keeps a morning and an afternoon run independent.
const LOCK_NAMESPACE: i64 = 0x5355_5247_4500_0000; // "SURGE"

fn lock_key(as_of_date: NaiveDate, session: Session) -> i64 {
    let session_bit = match session {
        Session::Morning => 0,
        Session::Afternoon => 1,
    };
    LOCK_NAMESPACE ^ ((as_of_date.num_days_from_ce() as i64) << 1 | session_bit)
}

pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    session: Session,
) -> anyhow::Result<bool> {
    let key = lock_key(as_of_date, session);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
    session: Session,
) -> anyhow::Result<()> {
    let key = lock_key(as_of_date, session);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release advisory lock (key={key})"))?;
    Ok(())
}
