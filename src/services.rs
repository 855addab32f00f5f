use crate::config::{AuthConfig, LedgerConfig};
use crate::database::LedgerStore;
use crate::errors::{CoinEngineError, Result};
use crate::models::{AuthRequest, AuthResponse, InfoResponse, SendCoinRequest};
use crate::security_middleware::issue_token;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::Arc;
use tracing::info;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| CoinEngineError::PasswordHash(err.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| CoinEngineError::PasswordHash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Coin movement engines and the read facade over the ledger store.
///
/// The store is the single source of truth for balances; this layer never
/// caches them and never retries a failed mutation on its own.
pub struct CoinService {
    store: Arc<dyn LedgerStore>,
    auth: AuthConfig,
    ledger: LedgerConfig,
}

impl CoinService {
    pub fn new(store: Arc<dyn LedgerStore>, auth: AuthConfig, ledger: LedgerConfig) -> Self {
        CoinService { store, auth, ledger }
    }

    /// Authenticate a user, creating the account on first authentication
    /// with the configured initial balance.
    pub async fn authenticate(&self, request: AuthRequest) -> Result<AuthResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| CoinEngineError::Validation(e.to_string()))?;

        if let Some(account) = self.store.get_account_by_username(&request.username).await? {
            if !verify_password(&account.password_hash, &request.password)? {
                return Err(CoinEngineError::Unauthorized);
            }
            return self.issue(account.id, &account.username);
        }

        let password_hash = hash_password(&request.password)?;
        let created = self
            .store
            .create_account(&request.username, &password_hash, self.ledger.initial_balance)
            .await;

        match created {
            Ok(account) => {
                info!(
                    "Created account {} for {} with {} coins",
                    account.id, account.username, account.coin_balance
                );
                self.issue(account.id, &account.username)
            }
            // Lost a create race against a concurrent first authentication;
            // the account exists now, so fall back to the login path.
            Err(CoinEngineError::DuplicateUsername(_)) => {
                let account = self
                    .store
                    .get_account_by_username(&request.username)
                    .await?
                    .ok_or(CoinEngineError::Unauthorized)?;
                if !verify_password(&account.password_hash, &request.password)? {
                    return Err(CoinEngineError::Unauthorized);
                }
                self.issue(account.id, &account.username)
            }
            Err(err) => Err(err),
        }
    }

    fn issue(&self, account_id: i64, username: &str) -> Result<AuthResponse> {
        let token = issue_token(
            &self.auth.jwt_secret,
            account_id,
            username,
            self.auth.token_ttl_hours,
        )?;
        Ok(AuthResponse { token })
    }

    /// Resolve a username to its account id.
    pub async fn resolve_username(&self, username: &str) -> Result<i64> {
        let account = self
            .store
            .get_account_by_username(username)
            .await?
            .ok_or_else(|| CoinEngineError::UserNotFound(username.to_string()))?;
        Ok(account.id)
    }

    /// Transfer engine: move coins from `sender_id` to the account behind
    /// `request.to_user`, atomically, with one durable transfer record.
    pub async fn send_coins(&self, sender_id: i64, request: SendCoinRequest) -> Result<()> {
        if request.amount <= 0 {
            return Err(CoinEngineError::InvalidAmount(request.amount));
        }

        validator::Validate::validate(&request)
            .map_err(|e| CoinEngineError::Validation(e.to_string()))?;

        let recipient_id = self.resolve_username(&request.to_user).await?;
        if recipient_id == sender_id {
            return Err(CoinEngineError::SelfTransfer);
        }

        self.store
            .transfer_coins(sender_id, recipient_id, request.amount)
            .await?;

        info!(
            "Transferred {} coins from account {} to {}",
            request.amount, sender_id, request.to_user
        );

        Ok(())
    }

    /// Purchase engine: debit the item price times `quantity` and credit
    /// the account's inventory, atomically.
    pub async fn buy_item(&self, account_id: i64, slug: &str, quantity: i64) -> Result<()> {
        if quantity <= 0 {
            return Err(CoinEngineError::InvalidQuantity(quantity));
        }

        self.store.purchase_item(account_id, slug, quantity).await?;

        info!(
            "Account {} bought {} x {}",
            account_id, quantity, slug
        );

        Ok(())
    }

    /// Query facade: balance, inventory and transfer history from one
    /// committed snapshot.
    pub async fn get_user_info(&self, account_id: i64) -> Result<InfoResponse> {
        let info = self.store.get_user_info(account_id).await?;
        Ok(info.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password(&hash, "correct horse battery staple").unwrap());
        assert!(!verify_password(&hash, "wrong password").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_match() {
        assert!(verify_password("not-a-phc-string", "anything").is_err());
    }
}
