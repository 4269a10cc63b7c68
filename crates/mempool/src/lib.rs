use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Errors returned by [`Mempool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("transaction already pending")]
    Duplicate,
}

struct Pool<Id, Tx> {
    by_id: HashMap<Id, Tx>,
    order: VecDeque<Id>,
}

/// A thread-safe FIFO mempool keyed by a transaction id.
///
/// Notes:
/// - Ordering is FIFO by insertion time.
/// - `add()` does not validate; callers admit transactions before adding them.
/// - `flush()` drains everything in one critical section, so each entry is
///   handed out by exactly one flush.
pub struct Mempool<Id, Tx>
where
    Id: Eq + Hash + Copy,
{
    id_of: Arc<dyn Fn(&Tx) -> Id + Send + Sync>,
    pool: Mutex<Pool<Id, Tx>>,
}

impl<Id, Tx> Mempool<Id, Tx>
where
    Id: Eq + Hash + Copy,
{
    /// Create a new mempool with a function that extracts the tx id from a transaction.
    pub fn new(id_of: impl Fn(&Tx) -> Id + Send + Sync + 'static) -> Self {
        Self {
            id_of: Arc::new(id_of),
            pool: Mutex::new(Pool {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Append a transaction. Rejects duplicates by tx id.
    pub fn add(&self, tx: Tx) -> Result<Id, MempoolError> {
        let id = (self.id_of)(&tx);
        let mut pool = self.pool.lock();
        if pool.by_id.contains_key(&id) {
            return Err(MempoolError::Duplicate);
        }

        pool.by_id.insert(id, tx);
        pool.order.push_back(id);
        Ok(id)
    }

    /// Remove a transaction by id.
    pub fn remove(&self, id: Id) -> Option<Tx> {
        let mut pool = self.pool.lock();
        let tx = pool.by_id.remove(&id)?;
        pool.order.retain(|queued| *queued != id);
        Some(tx)
    }

    /// Returns true if the mempool currently contains this id.
    pub fn contains(&self, id: Id) -> bool {
        self.pool.lock().by_id.contains_key(&id)
    }

    /// Number of currently-stored transactions.
    pub fn len(&self) -> usize {
        self.pool.lock().by_id.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.pool.lock().by_id.is_empty()
    }

    /// Drain every pending transaction in FIFO order, leaving the pool empty.
    pub fn flush(&self) -> Vec<Tx> {
        let mut pool = self.pool.lock();
        let order = std::mem::take(&mut pool.order);
        let mut by_id = std::mem::take(&mut pool.by_id);
        drop(pool);

        order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }
}

impl<Id, Tx> Mempool<Id, Tx>
where
    Id: Eq + Hash + Copy,
    Tx: Clone,
{
    /// Copy of the pending transactions in FIFO order.
    pub fn snapshot(&self) -> Vec<Tx> {
        let pool = self.pool.lock();
        pool.order
            .iter()
            .filter_map(|id| pool.by_id.get(id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Tx {
        id: u64,
        payload: &'static str,
    }

    fn tx(id: u64, payload: &'static str) -> Tx {
        Tx { id, payload }
    }

    #[test]
    fn add_and_contains() {
        let mp = Mempool::<u64, Tx>::new(|tx| tx.id);

        assert_eq!(mp.add(tx(1, "a")), Ok(1));
        assert!(mp.contains(1));
        assert_eq!(mp.len(), 1);
        assert!(!mp.is_empty());
    }

    #[test]
    fn duplicate_rejected() {
        let mp = Mempool::<u64, Tx>::new(|tx| tx.id);

        mp.add(tx(7, "x")).unwrap();
        let err = mp.add(tx(7, "y")).unwrap_err();
        assert_eq!(err, MempoolError::Duplicate);

        // original remains
        assert_eq!(mp.snapshot(), vec![tx(7, "x")]);
    }

    #[test]
    fn remove_works() {
        let mp = Mempool::<u64, Tx>::new(|tx| tx.id);

        mp.add(tx(2, "b")).unwrap();
        let removed = mp.remove(2).unwrap();
        assert_eq!(removed.payload, "b");
        assert!(!mp.contains(2));
        assert!(mp.is_empty());
        assert!(mp.remove(2).is_none());
    }

    #[test]
    fn flush_is_fifo_and_empties_pool() {
        let mp = Mempool::<u64, Tx>::new(|tx| tx.id);

        mp.add(tx(1, "a")).unwrap();
        mp.add(tx(2, "b")).unwrap();
        mp.add(tx(3, "c")).unwrap();

        // remove one in the middle before flushing
        mp.remove(2);

        let flushed = mp.flush();
        let payloads: Vec<_> = flushed.into_iter().map(|t| t.payload).collect();
        assert_eq!(payloads, vec!["a", "c"]);
        assert!(mp.is_empty());
        assert!(mp.flush().is_empty());

        // ids are free again after a flush
        mp.add(tx(1, "again")).unwrap();
        assert_eq!(mp.len(), 1);
    }

    #[test]
    fn concurrent_flushes_never_share_an_entry() {
        let mp = Arc::new(Mempool::<u64, Tx>::new(|tx| tx.id));
        let total = 2_000u64;

        let producer = {
            let mp = Arc::clone(&mp);
            thread::spawn(move || {
                for id in 0..total {
                    mp.add(tx(id, "p")).unwrap();
                }
            })
        };
        let flushers: Vec<_> = (0..4)
            .map(|_| {
                let mp = Arc::clone(&mp);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..200 {
                        seen.extend(mp.flush().into_iter().map(|t| t.id));
                    }
                    seen
                })
            })
            .collect();

        producer.join().unwrap();
        let mut delivered: Vec<u64> = flushers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        delivered.extend(mp.flush().into_iter().map(|t| t.id));

        let unique: HashSet<u64> = delivered.iter().copied().collect();
        assert_eq!(delivered.len() as u64, total);
        assert_eq!(unique.len() as u64, total);
    }
}
