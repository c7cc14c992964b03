use crate::domain::{SelectionItem, SelectionReport};
use anyhow::Context;

/// Stores one report and its picks in a single transaction. Re-running the
/// same (date, session) replaces the earlier rows.
pub async fn persist_report(
    pool: &sqlx::PgPool,
    report: &SelectionReport,
    provider: &str,
) -> anyhow::Result<uuid::Uuid> {
    let stats = serde_json::to_value(&report.stats).context("serialize run stats failed")?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query("DELETE FROM surge_selections WHERE as_of_date = $1 AND session = $2")
        .bind(report.as_of_date)
        .bind(report.session.as_str())
        .execute(&mut *tx)
        .await
        .context("delete previous surge_selections failed")?;

    let selection_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO surge_selections (as_of_date, session, generated_at, provider, stats) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id",
    )
    .bind(report.as_of_date)
    .bind(report.session.as_str())
    .bind(report.generated_at)
    .bind(provider)
    .bind(stats)
    .fetch_one(&mut *tx)
    .await
    .context("insert surge_selections failed")?;

    for item in &report.items {
        insert_item(&mut tx, selection_id, item).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(selection_id)
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    selection_id: uuid::Uuid,
    item: &SelectionItem,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO surge_selection_items \
         (selection_id, rank, ticker, name, trigger, composite_score, final_score, price, stop_loss, target_price, risk_reward) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(selection_id)
    .bind(item.rank)
    .bind(&item.ticker)
    .bind(&item.name)
    .bind(&item.trigger)
    .bind(item.composite_score)
    .bind(item.final_score)
    .bind(item.price)
    .bind(item.stop_loss)
    .bind(item.target_price)
    .bind(item.risk_reward)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert surge_selection_items failed (ticker={})", item.ticker))?;

    Ok(())
}
