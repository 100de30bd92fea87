//! Table and index DDL

use sqlx::PgPool;

use super::SetupError;
use crate::core_types::KeyScheme;

/// `accounts` DDL for the given key scheme
pub fn accounts_ddl(scheme: KeyScheme) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS accounts (
            id {} PRIMARY KEY,
            balance NUMERIC NOT NULL
        )",
        scheme.sql_type()
    )
}

/// `transactions` DDL. The record id is always a random UUID; the account
/// columns follow the accounts key type.
pub fn transactions_ddl(scheme: KeyScheme) -> String {
    let key = scheme.sql_type();
    format!(
        "CREATE TABLE IF NOT EXISTS transactions (
            id UUID PRIMARY KEY,
            payer_id {key} NOT NULL,
            payee_id {key} NOT NULL,
            amount NUMERIC NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
    )
}

pub const PAYER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_payer ON transactions (payer_id, created_at)";
pub const PAYEE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_transactions_payee ON transactions (payee_id, created_at)";

/// Create both tables and the history indexes. Idempotent.
pub async fn create(pool: &PgPool, scheme: KeyScheme) -> Result<(), SetupError> {
    sqlx::query(&accounts_ddl(scheme)).execute(pool).await?;
    tracing::info!(key_type = scheme.sql_type(), "accounts table ready");

    sqlx::query(&transactions_ddl(scheme)).execute(pool).await?;
    sqlx::query(PAYER_INDEX).execute(pool).await?;
    sqlx::query(PAYEE_INDEX).execute(pool).await?;
    tracing::info!("transactions table ready");
    Ok(())
}

/// Remove every account and transaction record
pub async fn clear(pool: &PgPool) -> Result<(), SetupError> {
    sqlx::query("DELETE FROM transactions").execute(pool).await?;
    sqlx::query("DELETE FROM accounts").execute(pool).await?;
    tracing::warn!("cleared existing accounts and transactions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_follows_key_scheme() {
        assert!(accounts_ddl(KeyScheme::Sequential).contains("id BIGINT PRIMARY KEY"));
        assert!(accounts_ddl(KeyScheme::Random).contains("id UUID PRIMARY KEY"));

        let ddl = transactions_ddl(KeyScheme::Random);
        assert!(ddl.contains("payer_id UUID"));
        assert!(ddl.contains("id UUID PRIMARY KEY"));
        assert!(transactions_ddl(KeyScheme::Sequential).contains("payee_id BIGINT"));
    }

    #[test]
    fn test_indexes_lead_with_account_then_time() {
        assert!(PAYER_INDEX.ends_with("(payer_id, created_at)"));
        assert!(PAYEE_INDEX.ends_with("(payee_id, created_at)"));
    }
}
