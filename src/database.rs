use crate::config::DatabaseConfig;
use crate::errors::{CoinEngineError, Result};
use crate::models::{Account, CatalogItem, InventoryEntry, ReceivedTransfer, SentTransfer, UserInfo};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Pool, Postgres, Transaction};
use std::time::Duration;

/// Storage capability of the ledger. The concrete implementation owns the
/// only durable copy of every balance; callers never cache balances.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create an account seeded with `initial_balance` coins.
    /// Fails with `DuplicateUsername` if the username is taken.
    async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
        initial_balance: i64,
    ) -> Result<Account>;

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn get_account_by_id(&self, id: i64) -> Result<Option<Account>>;

    /// Balance lookup for the read path. Returns 0 for an unknown account
    /// instead of failing; mutation preconditions never rely on this.
    async fn get_balance(&self, id: i64) -> Result<i64>;

    async fn get_inventory(&self, id: i64) -> Result<Vec<InventoryEntry>>;

    /// Transfer history of an account, newest first: (sent, received).
    async fn get_history(&self, id: i64) -> Result<(Vec<SentTransfer>, Vec<ReceivedTransfer>)>;

    async fn get_catalog_item(&self, slug: &str) -> Result<Option<CatalogItem>>;

    /// Balance, inventory and both history directions read against a single
    /// point-in-time snapshot.
    async fn get_user_info(&self, id: i64) -> Result<UserInfo>;

    /// Move `amount` coins between two accounts and record the transfer,
    /// all inside one transaction. Both balance rows are locked before
    /// either is mutated, in ascending account-id order.
    async fn transfer_coins(&self, from_id: i64, to_id: i64, amount: i64) -> Result<()>;

    /// Debit `price * quantity` coins, record the purchase and upsert the
    /// inventory counter, all inside one transaction.
    async fn purchase_item(&self, user_id: i64, slug: &str, quantity: i64) -> Result<()>;
}

pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations (schema + catalog seed).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Read a balance under an exclusive row lock held until the surrounding
/// transaction commits or rolls back.
async fn lock_balance(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<Option<i64>> {
    let balance = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT coin_balance FROM users WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(balance)
}

#[async_trait]
impl LedgerStore for Database {
    async fn create_account(
        &self,
        username: &str,
        password_hash: &str,
        initial_balance: i64,
    ) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO users (username, password_hash, coin_balance)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash, coin_balance, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(initial_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                CoinEngineError::DuplicateUsername(username.to_string())
            }
            _ => CoinEngineError::Database(err),
        })?;

        Ok(account)
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, password_hash, coin_balance, created_at
            FROM users WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, username, password_hash, coin_balance, created_at
            FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_balance(&self, id: i64) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT coin_balance FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    async fn get_inventory(&self, id: i64) -> Result<Vec<InventoryEntry>> {
        let entries = sqlx::query_as::<_, InventoryEntry>(
            r#"
            SELECT item_slug, quantity FROM inventory
            WHERE user_id = $1
            ORDER BY item_slug
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get_history(&self, id: i64) -> Result<(Vec<SentTransfer>, Vec<ReceivedTransfer>)> {
        let sent = sqlx::query_as::<_, SentTransfer>(
            r#"
            SELECT u.username AS to_user, ct.amount
            FROM coin_transfers ct
            JOIN users u ON ct.to_user_id = u.id
            WHERE ct.from_user_id = $1
            ORDER BY ct.created_at DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let received = sqlx::query_as::<_, ReceivedTransfer>(
            r#"
            SELECT u.username AS from_user, ct.amount
            FROM coin_transfers ct
            JOIN users u ON ct.from_user_id = u.id
            WHERE ct.to_user_id = $1
            ORDER BY ct.created_at DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok((sent, received))
    }

    async fn get_catalog_item(&self, slug: &str) -> Result<Option<CatalogItem>> {
        let item = sqlx::query_as::<_, CatalogItem>(
            r#"
            SELECT slug, title, price FROM merch_items WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn get_user_info(&self, id: i64) -> Result<UserInfo> {
        let mut tx = self.pool.begin().await?;

        // All four reads must observe the same committed state.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let coins = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT coin_balance FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let coins = match coins {
            Some(coins) => coins,
            None => {
                let _ = tx.rollback().await;
                return Err(CoinEngineError::AccountNotFound(id));
            }
        };

        let inventory = sqlx::query_as::<_, InventoryEntry>(
            r#"
            SELECT item_slug, quantity FROM inventory
            WHERE user_id = $1
            ORDER BY item_slug
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let sent = sqlx::query_as::<_, SentTransfer>(
            r#"
            SELECT u.username AS to_user, ct.amount
            FROM coin_transfers ct
            JOIN users u ON ct.to_user_id = u.id
            WHERE ct.from_user_id = $1
            ORDER BY ct.created_at DESC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let received = sqlx::query_as::<_, ReceivedTransfer>(
            r#"
            SELECT u.username AS from_user, ct.amount
            FROM coin_transfers ct
            JOIN users u ON ct.from_user_id = u.id
            WHERE ct.to_user_id = $1
            ORDER BY ct.created_at DESC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(UserInfo {
            coins,
            inventory,
            sent,
            received,
        })
    }

    async fn transfer_coins(&self, from_id: i64, to_id: i64, amount: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Fixed global lock order: ascending account id. Two concurrent
        // opposite-direction transfers on the same pair then contend on the
        // same first row instead of deadlocking.
        let (first_id, second_id) = if from_id < to_id {
            (from_id, to_id)
        } else {
            (to_id, from_id)
        };

        let first = lock_balance(&mut tx, first_id).await?;
        let Some(first) = first else {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::AccountNotFound(first_id));
        };

        let second = lock_balance(&mut tx, second_id).await?;
        let Some(second) = second else {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::AccountNotFound(second_id));
        };

        let sender_balance = if from_id == first_id { first } else { second };
        if sender_balance < amount {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::InsufficientFunds {
                required: amount,
                available: sender_balance,
            });
        }

        sqlx::query(
            r#"
            UPDATE users SET coin_balance = coin_balance - $1 WHERE id = $2
            "#,
        )
        .bind(amount)
        .bind(from_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE users SET coin_balance = coin_balance + $1 WHERE id = $2
            "#,
        )
        .bind(amount)
        .bind(to_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO coin_transfers (from_user_id, to_user_id, amount)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn purchase_item(&self, user_id: i64, slug: &str, quantity: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Catalog prices are read-only reference data; no write lock needed.
        let price = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT price FROM merch_items WHERE slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(price) = price else {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::ItemNotFound(slug.to_string()));
        };

        let Some(total_price) = price.checked_mul(quantity) else {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::InvalidQuantity(quantity));
        };

        let balance = lock_balance(&mut tx, user_id).await?;
        let Some(balance) = balance else {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::AccountNotFound(user_id));
        };

        if balance < total_price {
            let _ = tx.rollback().await;
            return Err(CoinEngineError::InsufficientFunds {
                required: total_price,
                available: balance,
            });
        }

        sqlx::query(
            r#"
            UPDATE users SET coin_balance = coin_balance - $1 WHERE id = $2
            "#,
        )
        .bind(total_price)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO merch_purchases (user_id, item_slug, quantity, total_price)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(slug)
        .bind(quantity)
        .bind(total_price)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO inventory (user_id, item_slug, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, item_slug)
            DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(user_id)
        .bind(slug)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
