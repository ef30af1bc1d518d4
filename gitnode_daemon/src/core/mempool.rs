//! Mempool (spec.md §6, consumed): `AddTx(tx) -> hash`, emitting
//! `EvtMempoolTxAdded`/`EvtMempoolTxRejected` so the miner's submit-work
//! path and the push handler's `WaitForPushTx` can subscribe without
//! polling. The transport that replicates accepted transactions to peers
//! is out of scope (spec.md §1); only the local accept/reject contract
//! lives here.

use async_trait::async_trait;
use gitnode_common::crypto::Hash;
use gitnode_common::transaction::Transaction;
use tokio::sync::broadcast;

use crate::core::error::NodeError;

#[derive(Debug, Clone)]
pub enum MempoolEvent {
    Added(Transaction),
    Rejected { tx: Transaction, error: String },
}

#[async_trait]
pub trait Mempool: Send + Sync {
    async fn add_tx(&self, tx: Transaction) -> Result<Hash, NodeError>;
    fn subscribe(&self) -> broadcast::Receiver<MempoolEvent>;
}

/// In-memory reference mempool: accepts any transaction whose nonce is
/// strictly greater than the sender's last-seen nonce, same ordering rule
/// a real mempool would enforce. Used to wire the miner and push handler
/// end to end without a network transport.
pub struct InMemoryMempool {
    events: broadcast::Sender<MempoolEvent>,
    last_nonce: std::sync::Mutex<std::collections::HashMap<gitnode_common::crypto::PublicKey, u64>>,
}

impl InMemoryMempool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { events, last_nonce: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }
}

impl Default for InMemoryMempool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mempool for InMemoryMempool {
    async fn add_tx(&self, tx: Transaction) -> Result<Hash, NodeError> {
        let sender = tx.sender;
        let mut last_nonce = self.last_nonce.lock().expect("mempool lock poisoned");
        let prior = last_nonce.get(&sender).copied().unwrap_or(0);
        if tx.nonce <= prior && prior != 0 {
            let error = "nonce not greater than last accepted".to_string();
            let _ = self.events.send(MempoolEvent::Rejected { tx: tx.clone(), error: error.clone() });
            return Err(NodeError::Validation(error));
        }
        last_nonce.insert(sender, tx.nonce);
        drop(last_nonce);

        let hash = tx.hash();
        let _ = self.events.send(MempoolEvent::Added(tx));
        Ok(hash)
    }

    fn subscribe(&self) -> broadcast::Receiver<MempoolEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitnode_common::crypto::KeyPair;
    use gitnode_common::transaction::{SubmitWorkPayload, TransactionPayload};
    use rand::rngs::OsRng;

    fn submit_work_tx(key_pair: &KeyPair, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            sender: key_pair.public_key(),
            nonce,
            fee: 0,
            payload: TransactionPayload::SubmitWork(SubmitWorkPayload { epoch: 1, nonce: 7 }),
            signature: gitnode_common::crypto::Signature::zero(),
        };
        tx.signature = key_pair.sign(&tx.signing_bytes());
        tx
    }

    #[tokio::test]
    async fn accepted_tx_is_broadcast_as_added() {
        let mempool = InMemoryMempool::new();
        let mut rx = mempool.subscribe();
        let key_pair = KeyPair::generate(&mut OsRng);
        mempool.add_tx(submit_work_tx(&key_pair, 1)).await.unwrap();
        match rx.recv().await.unwrap() {
            MempoolEvent::Added(_) => {}
            other => panic!("expected Added, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_nonce_is_rejected() {
        let mempool = InMemoryMempool::new();
        let key_pair = KeyPair::generate(&mut OsRng);

        mempool.add_tx(submit_work_tx(&key_pair, 5)).await.unwrap();
        let err = mempool.add_tx(submit_work_tx(&key_pair, 5)).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }
}
