use sqlx::{PgPool, Row};

use crate::models::PaymentRow;

pub async fn fetch_payments(pool: &PgPool) -> anyhow::Result<Vec<PaymentRow>> {
    let rows = sqlx::query(
        r#"
        SELECT payment_date::date AS paid_at, amount::float8 AS amount
        FROM payments
        WHERE payment_date IS NOT NULL
        AND amount > 0
        ORDER BY payment_date ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let payments = rows
        .into_iter()
        .map(|row| PaymentRow {
            paid_at: row.get("paid_at"),
            amount: row.get("amount"),
        })
        .collect();

    Ok(payments)
}

pub async fn probe(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
