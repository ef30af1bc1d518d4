use std::sync::Arc;

use async_trait::async_trait;
use gitnode_common::account::Account;
use gitnode_common::crypto::Address;
use gitnode_common::serializer::Serializer;

use crate::core::error::NodeError;
use crate::core::schema::account_key;
use crate::core::storage::Storage;

/// `Get(address, height…) -> Account`; `Update(address, account)` overwrites
/// entirely (spec.md §4.3).
#[async_trait]
pub trait AccountKeeper: Send + Sync {
    async fn get(&self, address: &Address, height: u64) -> Result<Account, NodeError>;
    async fn update(&self, address: &Address, account: Account) -> Result<(), NodeError>;
}

pub struct TreeAccountKeeper {
    storage: Arc<Storage>,
}

impl TreeAccountKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AccountKeeper for TreeAccountKeeper {
    async fn get(&self, address: &Address, height: u64) -> Result<Account, NodeError> {
        let key = account_key(address.as_bytes());
        match self.storage.tree.get_at(&key, height) {
            None => Ok(Account::bare()),
            Some(bytes) => Account::from_bytes(&bytes).map_err(|_| NodeError::Corruption {
                what: "account",
                key: hex::encode(&key),
            }),
        }
    }

    async fn update(&self, address: &Address, account: Account) -> Result<(), NodeError> {
        let key = account_key(address.as_bytes());
        self.storage.tree.set(&key, &account.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_account_is_bare() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeAccountKeeper::new(storage);
        let address = Address::from_hex("0000000000000000000000000000000000000001").unwrap();
        assert_eq!(keeper.get(&address, 0).await.unwrap(), Account::bare());
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeAccountKeeper::new(storage);
        let address = Address::from_hex("0000000000000000000000000000000000000002").unwrap();
        let account = Account { nonce: 4, balance: 99, extra: vec![1, 2, 3] };
        keeper.update(&address, account.clone()).await.unwrap();
        assert_eq!(keeper.get(&address, 0).await.unwrap(), account);
    }
}
