//! `dialer db status` / `dialer db migrate`.

use anyhow::Result;
use sqlx::PgPool;

pub async fn status(pool: &PgPool) -> Result<()> {
    let s = dialer_db::status(pool).await?;
    println!("db_ok={} has_campaigns_table={}", s.ok, s.has_campaigns_table);
    Ok(())
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    dialer_db::migrate(pool).await?;
    println!("migrations_applied=true");
    Ok(())
}
