use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Ledger account row. The balance is mutated only through the transfer
/// and purchase engines, never directly.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub coin_balance: i64,
    pub created_at: DateTime<Utc>,
}

/// Catalog item. Read-only reference data for the purchase engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CatalogItem {
    pub slug: String,
    pub title: String,
    pub price: i64,
}

/// Per-account per-item purchased quantity counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryEntry {
    #[serde(rename = "type")]
    #[sqlx(rename = "item_slug")]
    pub item: String,
    pub quantity: i64,
}

/// One outgoing transfer, as seen in the sender's history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SentTransfer {
    #[serde(rename = "toUser")]
    pub to_user: String,
    pub amount: i64,
}

/// One incoming transfer, as seen in the recipient's history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReceivedTransfer {
    #[serde(rename = "fromUser")]
    pub from_user: String,
    pub amount: i64,
}

/// Consistent snapshot of an account's balance, inventory and transfer
/// history, read against a single point-in-time view of the store.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub coins: i64,
    pub inventory: Vec<InventoryEntry>,
    pub sent: Vec<SentTransfer>,
    pub received: Vec<ReceivedTransfer>,
}

/// Authentication request. First authentication creates the account.
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct AuthRequest {
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Coin transfer request; the recipient is addressed by username.
#[derive(Debug, Clone, Deserialize, Serialize, validator::Validate)]
pub struct SendCoinRequest {
    #[serde(rename = "toUser")]
    #[validate(length(min = 1))]
    pub to_user: String,
    #[validate(range(min = 1))]
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoinHistory {
    pub sent: Vec<SentTransfer>,
    pub received: Vec<ReceivedTransfer>,
}

/// Response body of the info endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub coins: i64,
    pub inventory: Vec<InventoryEntry>,
    #[serde(rename = "coinHistory")]
    pub coin_history: CoinHistory,
}

impl From<UserInfo> for InfoResponse {
    fn from(info: UserInfo) -> Self {
        InfoResponse {
            coins: info.coins,
            inventory: info.inventory,
            coin_history: CoinHistory {
                sent: info.sent,
                received: info.received,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn send_coin_request_rejects_non_positive_amount() {
        let req = SendCoinRequest {
            to_user: "bob".to_string(),
            amount: 0,
        };
        assert!(req.validate().is_err());

        let req = SendCoinRequest {
            to_user: "bob".to_string(),
            amount: 1,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn auth_request_enforces_password_length() {
        let req = AuthRequest {
            username: "alice".to_string(),
            password: "short".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn info_response_uses_the_wire_field_names() {
        let info = UserInfo {
            coins: 700,
            inventory: vec![InventoryEntry { item: "cup".into(), quantity: 2 }],
            sent: vec![SentTransfer { to_user: "bob".into(), amount: 300 }],
            received: vec![],
        };
        let body = serde_json::to_value(InfoResponse::from(info)).unwrap();

        assert_eq!(body["coins"], 700);
        assert_eq!(body["inventory"][0]["type"], "cup");
        assert_eq!(body["coinHistory"]["sent"][0]["toUser"], "bob");
        assert!(body["coinHistory"]["received"].as_array().unwrap().is_empty());
    }
}
