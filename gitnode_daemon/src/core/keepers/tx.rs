use std::sync::Arc;

use async_trait::async_trait;

use crate::core::error::NodeError;
use crate::core::schema::tx_key;
use crate::core::storage::Storage;

/// `Index(tx)` writes `key=Tag_Tx|hash, value=tx.bytes`; `GetTx(hash)`
/// returns `ErrTxNotFound` distinctly from other errors (spec.md §4.3).
#[async_trait]
pub trait TxKeeper: Send + Sync {
    async fn index(&self, hash: &[u8], tx_bytes: &[u8]) -> Result<(), NodeError>;
    async fn get_tx(&self, hash: &[u8]) -> Result<Vec<u8>, NodeError>;
}

pub struct TreeTxKeeper {
    storage: Arc<Storage>,
}

impl TreeTxKeeper {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TxKeeper for TreeTxKeeper {
    async fn index(&self, hash: &[u8], tx_bytes: &[u8]) -> Result<(), NodeError> {
        let key = tx_key(hash);
        self.storage
            .tree
            .set(&key, tx_bytes)
            .map_err(|e| NodeError::TxIndexFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_tx(&self, hash: &[u8]) -> Result<Vec<u8>, NodeError> {
        let key = tx_key(hash);
        self.storage.tree.get_at(&key, 0).ok_or(NodeError::ErrTxNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn index_then_get_round_trips() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeTxKeeper::new(storage);
        keeper.index(b"hash1", b"tx-bytes").await.unwrap();
        assert_eq!(keeper.get_tx(b"hash1").await.unwrap(), b"tx-bytes");
    }

    #[tokio::test]
    async fn unknown_tx_errors_distinctly() {
        let storage = Arc::new(Storage::new());
        let keeper = TreeTxKeeper::new(storage);
        let err = keeper.get_tx(b"unknown").await.unwrap_err();
        assert!(matches!(err, NodeError::ErrTxNotFound));
    }
}
