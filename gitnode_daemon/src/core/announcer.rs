//! Announcer session (spec.md §4.9): an embedded queue keyed by an
//! announcement's object key, one worker task per session. Dequeued items
//! call the DHT provider's announce; success reschedules the key in the
//! DHT keeper's persisted announce list with a new future time, failure
//! applies bounded retries (spec.md §7 "announcer retries each task bounded
//! by `MaxRetry`").

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use gitnode_common::crypto::Hash;
use gitnode_common::dht::DhtObjectType;
use tokio::sync::mpsc;

use crate::core::dht_client::Dht;
use crate::core::error::AnnouncerError;
use crate::core::keepers::dht::DhtKeeper;
use gitnode_common::params;

struct QueueItem {
    object_type: DhtObjectType,
    repo_name: String,
    key: Hash,
}

/// Seconds to push the next scheduled announce out by on success; mirrors
/// the eviction/cleanup cadence knobs in shape (a plain constant, not a
/// tunable, since no spec section names it as process-wide configuration).
const REANNOUNCE_DELAY_SECS: u64 = 60 * 60;

pub struct AnnouncerSession {
    dht_keeper: Arc<dyn DhtKeeper>,
    dht: Arc<dyn Dht>,
    queued: Mutex<HashSet<Hash>>,
    sender: mpsc::UnboundedSender<QueueItem>,
    failed_count: Arc<std::sync::atomic::AtomicUsize>,
    done: Mutex<Option<Box<dyn FnOnce(usize) + Send>>>,
    pending: Arc<std::sync::atomic::AtomicUsize>,
}

impl AnnouncerSession {
    pub fn new(dht_keeper: Arc<dyn DhtKeeper>, dht: Arc<dyn Dht>) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueueItem>();
        let session = Arc::new(Self {
            dht_keeper,
            dht,
            queued: Mutex::new(HashSet::new()),
            sender,
            failed_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            done: Mutex::new(None),
            pending: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        });

        let worker_session = session.clone();
        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                worker_session.process(item).await;
            }
        });

        session
    }

    /// Enqueues unless the key is already queued (spec.md §4.9
    /// "`Announce` ... enqueues unless the key is already queued, in which
    /// case returns false").
    pub fn announce(&self, object_type: DhtObjectType, repo_name: String, key: Hash) -> bool {
        if !self.queued.lock().expect("announcer lock poisoned").insert(key) {
            return false;
        }
        self.pending.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let _ = self.sender.send(QueueItem { object_type, repo_name, key });
        true
    }

    /// Registers the completion callback; fires once every queued item up
    /// to the moment of registration has finished processing.
    pub fn on_done(self: &Arc<Self>, cb: impl FnOnce(usize) + Send + 'static) {
        *self.done.lock().expect("announcer lock poisoned") = Some(Box::new(cb));
        self.maybe_fire_done();
    }

    fn maybe_fire_done(&self) {
        if self.pending.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            if let Some(cb) = self.done.lock().expect("announcer lock poisoned").take() {
                cb(self.failed_count.load(std::sync::atomic::Ordering::SeqCst));
            }
        }
    }

    async fn process(&self, item: QueueItem) {
        let max_retry = params::announcer_max_retry();
        let mut attempt = 0;
        let mut succeeded = false;

        loop {
            attempt += 1;
            let session = self.dht.new_announcer_session();
            match session.announce(item.object_type, &item.repo_name, &item.key).await {
                Ok(()) => {
                    succeeded = true;
                    break;
                }
                Err(_) if attempt < max_retry => continue,
                Err(_) => break,
            }
        }

        self.queued.lock().expect("announcer lock poisoned").remove(&item.key);

        if succeeded {
            let next_time = current_unix_time() + REANNOUNCE_DELAY_SECS;
            let _ = self.dht_keeper.add_to_announce_list(&item.key, &item.repo_name, item.object_type, next_time).await;
        } else {
            self.failed_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            metrics::counter!("announcer_retries_exhausted_total").increment(1);
            log::warn!(
                "announcer: exhausted retries for {} ({:?}): {}",
                item.repo_name,
                item.object_type,
                AnnouncerError::RetriesExhausted(item.key.to_hex())
            );
        }

        self.pending.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        self.maybe_fire_done();
    }

    /// Scans the announce-list and re-queues any entry whose next-time is
    /// at or before now (spec.md §4.9 "`Reannounce`").
    pub async fn reannounce(self: &Arc<Self>) {
        let now = current_unix_time();
        let mut due = Vec::new();
        let _ = self
            .dht_keeper
            .iterate_announce_list(&mut |entry| {
                if entry.scheduled_time > now {
                    return false; // soonest-first order: nothing further is due
                }
                due.push(entry);
                true
            })
            .await;

        for entry in due {
            self.announce(entry.object_type, entry.repo_name, entry.key);
        }
    }
}

fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
