// Engine behavior against a mocked ledger store: validation ordering,
// error pass-through, and the authentication flows.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use coin_engine::config::{AuthConfig, LedgerConfig};
    use coin_engine::database::LedgerStore;
    use coin_engine::errors::{CoinEngineError, Result};
    use coin_engine::models::{
        Account, AuthRequest, CatalogItem, InventoryEntry, ReceivedTransfer, SendCoinRequest,
        SentTransfer, UserInfo,
    };
    use coin_engine::security_middleware::Claims;
    use coin_engine::services::{hash_password, CoinService};
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use std::sync::Arc;

    mockall::mock! {
        pub Store {}

        #[async_trait]
        impl LedgerStore for Store {
            async fn create_account(
                &self,
                username: &str,
                password_hash: &str,
                initial_balance: i64,
            ) -> Result<Account>;
            async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>>;
            async fn get_account_by_id(&self, id: i64) -> Result<Option<Account>>;
            async fn get_balance(&self, id: i64) -> Result<i64>;
            async fn get_inventory(&self, id: i64) -> Result<Vec<InventoryEntry>>;
            async fn get_history(&self, id: i64)
                -> Result<(Vec<SentTransfer>, Vec<ReceivedTransfer>)>;
            async fn get_catalog_item(&self, slug: &str) -> Result<Option<CatalogItem>>;
            async fn get_user_info(&self, id: i64) -> Result<UserInfo>;
            async fn transfer_coins(&self, from_id: i64, to_id: i64, amount: i64) -> Result<()>;
            async fn purchase_item(&self, user_id: i64, slug: &str, quantity: i64) -> Result<()>;
        }
    }

    const SECRET: &str = "0123456789abcdef";

    fn service(store: MockStore) -> CoinService {
        CoinService::new(
            Arc::new(store),
            AuthConfig {
                jwt_secret: SECRET.to_string(),
                token_ttl_hours: 24,
            },
            LedgerConfig { initial_balance: 1000 },
        )
    }

    fn account(id: i64, username: &str, balance: i64) -> Account {
        Account {
            id,
            username: username.to_string(),
            password_hash: String::new(),
            coin_balance: balance,
            created_at: Utc::now(),
        }
    }

    fn send(to_user: &str, amount: i64) -> SendCoinRequest {
        SendCoinRequest {
            to_user: to_user.to_string(),
            amount,
        }
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_before_any_store_call() {
        // No expectations: any store call would panic the mock.
        let service = service(MockStore::new());

        let err = service.send_coins(1, send("bob", 0)).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::InvalidAmount(0)));

        let err = service.send_coins(1, send("bob", -5)).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::InvalidAmount(-5)));
    }

    #[tokio::test]
    async fn transfer_to_unknown_user_fails_with_user_not_found() {
        let mut store = MockStore::new();
        store
            .expect_get_account_by_username()
            .withf(|username| username == "ghost")
            .returning(|_| Ok(None));

        let err = service(store).send_coins(1, send("ghost", 10)).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::UserNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn self_transfer_is_rejected_without_touching_balances() {
        let mut store = MockStore::new();
        store
            .expect_get_account_by_username()
            .returning(|username| Ok(Some(account(7, username, 500))));

        let err = service(store).send_coins(7, send("alice", 100)).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::SelfTransfer));
    }

    #[tokio::test]
    async fn successful_transfer_reaches_the_store_exactly_once() {
        let mut store = MockStore::new();
        store
            .expect_get_account_by_username()
            .withf(|username| username == "bob")
            .returning(|_| Ok(Some(account(9, "bob", 100))));
        store
            .expect_transfer_coins()
            .withf(|from, to, amount| (*from, *to, *amount) == (1, 9, 300))
            .times(1)
            .returning(|_, _, _| Ok(()));

        service(store).send_coins(1, send("bob", 300)).await.unwrap();
    }

    #[tokio::test]
    async fn insufficient_funds_surfaces_with_the_locked_balance() {
        let mut store = MockStore::new();
        store
            .expect_get_account_by_username()
            .returning(|_| Ok(Some(account(2, "dora", 0))));
        store.expect_transfer_coins().returning(|_, _, amount| {
            Err(CoinEngineError::InsufficientFunds {
                required: amount,
                available: 50,
            })
        });

        let err = service(store).send_coins(3, send("dora", 100)).await.unwrap_err();
        assert!(matches!(
            err,
            CoinEngineError::InsufficientFunds { required: 100, available: 50 }
        ));
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected_before_any_store_call() {
        let service = service(MockStore::new());

        let err = service.buy_item(1, "cup", 0).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::InvalidQuantity(0)));

        let err = service.buy_item(1, "cup", -3).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::InvalidQuantity(-3)));
    }

    #[tokio::test]
    async fn purchase_is_forwarded_to_the_store() {
        let mut store = MockStore::new();
        store
            .expect_purchase_item()
            .withf(|user_id, slug, quantity| *user_id == 5 && slug == "cup" && *quantity == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));

        service(store).buy_item(5, "cup", 2).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_item_fails_with_item_not_found() {
        let mut store = MockStore::new();
        store
            .expect_purchase_item()
            .returning(|_, slug, _| Err(CoinEngineError::ItemNotFound(slug.to_string())));

        let err = service(store).buy_item(5, "yacht", 1).await.unwrap_err();
        assert!(matches!(err, CoinEngineError::ItemNotFound(slug) if slug == "yacht"));
    }

    #[tokio::test]
    async fn user_info_is_mapped_onto_the_wire_shape() {
        let mut store = MockStore::new();
        store.expect_get_user_info().returning(|_| {
            Ok(UserInfo {
                coins: 700,
                inventory: vec![InventoryEntry { item: "cup".into(), quantity: 2 }],
                sent: vec![SentTransfer { to_user: "bob".into(), amount: 300 }],
                received: vec![ReceivedTransfer { from_user: "carol".into(), amount: 40 }],
            })
        });

        let info = service(store).get_user_info(1).await.unwrap();
        assert_eq!(info.coins, 700);
        assert_eq!(info.inventory.len(), 1);
        assert_eq!(info.coin_history.sent[0].to_user, "bob");
        assert_eq!(info.coin_history.received[0].amount, 40);
    }

    #[tokio::test]
    async fn first_authentication_creates_the_account_with_the_initial_balance() {
        let mut store = MockStore::new();
        store
            .expect_get_account_by_username()
            .returning(|_| Ok(None));
        store
            .expect_create_account()
            .withf(|username, _, initial_balance| username == "alice" && *initial_balance == 1000)
            .times(1)
            .returning(|username, password_hash, initial_balance| {
                Ok(Account {
                    id: 1,
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    coin_balance: initial_balance,
                    created_at: Utc::now(),
                })
            });

        let response = service(store)
            .authenticate(AuthRequest {
                username: "alice".to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap();

        let claims = decode::<Claims>(
            &response.token,
            &DecodingKey::from_secret(SECRET.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap()
        .claims;
        assert_eq!(claims.account_id(), Some(1));
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn wrong_password_on_an_existing_account_is_unauthorized() {
        let mut store = MockStore::new();
        let hash = hash_password("the-real-password").unwrap();
        store.expect_get_account_by_username().returning(move |_| {
            let mut account = account(4, "alice", 1000);
            account.password_hash = hash.clone();
            Ok(Some(account))
        });

        let err = service(store)
            .authenticate(AuthRequest {
                username: "alice".to_string(),
                password: "wrong-password".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoinEngineError::Unauthorized));
    }

    #[tokio::test]
    async fn correct_password_on_an_existing_account_issues_a_token() {
        let mut store = MockStore::new();
        let hash = hash_password("the-real-password").unwrap();
        store.expect_get_account_by_username().returning(move |_| {
            let mut account = account(4, "alice", 1000);
            account.password_hash = hash.clone();
            Ok(Some(account))
        });

        let response = service(store)
            .authenticate(AuthRequest {
                username: "alice".to_string(),
                password: "the-real-password".to_string(),
            })
            .await
            .unwrap();
        assert!(!response.token.is_empty());
    }

    #[tokio::test]
    async fn create_race_falls_back_to_the_login_path() {
        let mut store = MockStore::new();
        let hash = hash_password("password123").unwrap();

        // First lookup misses; after losing the insert race the second
        // lookup finds the concurrently created account.
        let mut lookups = 0;
        let race_hash = hash.clone();
        store.expect_get_account_by_username().returning(move |_| {
            lookups += 1;
            if lookups == 1 {
                Ok(None)
            } else {
                let mut account = account(11, "alice", 1000);
                account.password_hash = race_hash.clone();
                Ok(Some(account))
            }
        });
        store
            .expect_create_account()
            .returning(|username, _, _| Err(CoinEngineError::DuplicateUsername(username.to_string())));

        let response = service(store)
            .authenticate(AuthRequest {
                username: "alice".to_string(),
                password: "password123".to_string(),
            })
            .await
            .unwrap();
        assert!(!response.token.is_empty());
    }
}
