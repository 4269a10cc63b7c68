use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use quarry_codec::txid;
use quarry_crypto::verify_tx;
use quarry_mempool::Mempool;
use quarry_state::LedgerState;
use quarry_types::{Address, AddressError, Block, Hash32, Transaction, TxId};

use crate::error::ChainError;
use crate::params::ConsensusParams;
use crate::pow::{genesis_block, mine};
use crate::store::ChainStore;
use crate::validation::{validate_block, validate_chain};

struct Ledger {
    /// Never empty: every constructor starts from a validated genesis.
    blocks: Vec<Block>,
    state: LedgerState,
}

impl Ledger {
    fn tip(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }
}

/// The accepted chain, its projected ledger state and the mempool.
///
/// Mutations (admission, block append, fork switch) take the ledger write
/// lock, so at most one is in flight and readers never see a half-applied
/// block. Mining is serialized by its own mutex and searches nonces without
/// holding the ledger lock; the sealed block is then committed through
/// [`Chain::add_block`] like any block received from a peer.
pub struct Chain {
    params: ConsensusParams,
    ledger: RwLock<Ledger>,
    mempool: Mempool<TxId, Transaction>,
    mining: Mutex<()>,
    /// Batch flushed by the running miner and not yet committed. Filled under
    /// the ledger lock, so admission sees each entry in the pool, here, or
    /// both.
    in_flight: Mutex<Vec<Transaction>>,
    store: Option<Arc<dyn ChainStore>>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Chain {
    /// A fresh chain holding only the genesis block for `params.difficulty`.
    pub fn new(params: ConsensusParams) -> Self {
        Self::assemble(params, vec![genesis_block(params.difficulty)], LedgerState::new())
    }

    /// Rebuild a chain from a stored or received block list.
    pub fn from_blocks(blocks: Vec<Block>, params: ConsensusParams) -> Result<Self, ChainError> {
        validate_chain(&blocks, &params).map_err(|e| ChainError::InvalidChain(e.to_string()))?;
        let state =
            LedgerState::from_blocks(&blocks).map_err(|e| ChainError::InvalidChain(e.to_string()))?;
        Ok(Self::assemble(params, blocks, state))
    }

    /// Load the chain saved in `store`, or start from genesis when the store
    /// is empty. The store stays attached for later commits.
    pub fn open(params: ConsensusParams, store: Arc<dyn ChainStore>) -> Result<Self, ChainError> {
        let chain = match store.load()? {
            Some(blocks) => {
                let chain = Self::from_blocks(blocks, params)?;
                info!(height = chain.height(), "loaded stored chain");
                chain
            }
            None => {
                info!("no stored chain, starting from genesis");
                Self::new(params)
            }
        };
        let chain = chain.with_store(store);
        chain.persist(&chain.ledger.read().blocks);
        Ok(chain)
    }

    fn assemble(params: ConsensusParams, blocks: Vec<Block>, state: LedgerState) -> Self {
        Self {
            params,
            ledger: RwLock::new(Ledger { blocks, state }),
            mempool: Mempool::new(txid),
            mining: Mutex::new(()),
            in_flight: Mutex::new(Vec::new()),
            store: None,
        }
    }

    /// Save after every committed mutation.
    pub fn with_store(mut self, store: Arc<dyn ChainStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    fn persist(&self, blocks: &[Block]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save(blocks) {
            warn!(%err, "failed to persist chain");
        }
    }

    /// Verify a signed transfer and queue it for the next block.
    ///
    /// The nonce and balance checks run against the sender's account with
    /// their queued transfers (pending or being mined) applied in nonce
    /// order, so a sender can queue several in a row. Queued transfers that
    /// no longer apply, because a block already used their nonce, are
    /// skipped. The check is advisory; the block that includes the transfer
    /// is the final word.
    pub fn add_transaction(&self, tx: Transaction) -> Result<TxId, ChainError> {
        let Some(from) = tx.from else {
            return Err(ChainError::InvalidTransaction(
                "coinbase transactions cannot be submitted".into(),
            ));
        };
        if tx.amount == 0 {
            return Err(ChainError::InvalidTransaction("amount must be positive".into()));
        }
        match verify_tx(&tx) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ChainError::InvalidTransaction(
                    "signature does not verify for sender".into(),
                ))
            }
            Err(err) => return Err(ChainError::InvalidTransaction(err.to_string())),
        }
        let required = tx
            .total_debit()
            .ok_or_else(|| ChainError::InvalidTransaction("amount plus fee overflows".into()))?;

        let ledger = self.ledger.write();
        let mut queued: Vec<Transaction> = self
            .in_flight
            .lock()
            .iter()
            .cloned()
            .chain(self.mempool.snapshot())
            .filter(|p| p.from == Some(from))
            .collect();
        queued.sort_by_key(|p| p.nonce);

        let mut account = ledger.state.account(&from);
        for p in &queued {
            // stale or duplicated entries simply do not apply
            let _ = account.apply_transaction(p);
        }

        let expected = account.next_nonce(&from);
        if tx.nonce != expected {
            return Err(ChainError::BadNonce {
                expected,
                got: tx.nonce,
            });
        }

        let balance = account.balance(&from);
        if balance < required {
            return Err(ChainError::InsufficientFunds { balance, required });
        }

        let id = self.mempool.add(tx)?;
        drop(ledger);
        debug!(txid = %hex::encode(id), %from, nonce = expected, "admitted transaction");
        Ok(id)
    }

    /// Mine the pending transactions into a new block paying `miner`.
    pub fn mine_pending_transactions(&self, miner: &str) -> Result<Block, ChainError> {
        let miner = miner.trim();
        if miner.is_empty() {
            return Err(ChainError::InvalidTransaction("miner address is empty".into()));
        }
        let miner: Address = miner
            .parse()
            .map_err(|e: AddressError| ChainError::InvalidTransaction(e.to_string()))?;
        self.mine_block(miner)
    }

    /// Flush the mempool, keep the transactions that still apply on top of
    /// the current tip, seal a block behind a coinbase for `miner` and commit
    /// it. If the commit fails the flushed transactions go back to the pool.
    pub fn mine_block(&self, miner: Address) -> Result<Block, ChainError> {
        let _mining = self.mining.lock();

        let (index, prev_hash, scratch, mut pending) = {
            let ledger = self.ledger.read();
            let pending = self.mempool.flush();
            *self.in_flight.lock() = pending.clone();
            let tip = ledger.tip();
            (tip.index + 1, tip.hash, ledger.state.clone(), pending)
        };
        // requeued entries can sit behind later nonces from the same sender
        pending.sort_by_key(|tx| tx.nonce);

        let outcome = self.seal_and_commit(miner, index, prev_hash, scratch, pending);
        self.in_flight.lock().clear();
        outcome
    }

    fn seal_and_commit(
        &self,
        miner: Address,
        index: u64,
        prev_hash: Hash32,
        mut scratch: LedgerState,
        pending: Vec<Transaction>,
    ) -> Result<Block, ChainError> {
        let timestamp = unix_now();
        let coinbase = Transaction::coinbase(miner, self.params.block_reward, timestamp);
        if let Err(err) = scratch.apply_transaction(&coinbase) {
            self.requeue(pending);
            return Err(ChainError::InvalidBlock(err.to_string()));
        }

        let mut transactions = Vec::with_capacity(pending.len() + 1);
        transactions.push(coinbase);
        for tx in pending {
            match scratch.apply_transaction(&tx) {
                Ok(()) => transactions.push(tx),
                Err(err) => {
                    debug!(txid = %hex::encode(txid(&tx)), %err, "dropping stale transaction")
                }
            }
        }
        let mut block = Block::new(index, timestamp, prev_hash, transactions);

        mine(&mut block, self.params.difficulty);

        if let Err(err) = self.add_block(block.clone()) {
            self.requeue(block.transactions.into_iter().skip(1));
            return Err(err);
        }
        info!(
            height = block.index,
            hash = %hex::encode(block.hash),
            txs = block.transactions.len(),
            "mined block"
        );
        Ok(block)
    }

    /// Drop pending transfers whose nonce `state` has already used.
    fn evict_consumed(&self, state: &LedgerState) {
        for tx in self.mempool.snapshot() {
            let Some(from) = tx.from else {
                continue;
            };
            if tx.nonce < state.next_nonce(&from) {
                debug!(txid = %hex::encode(txid(&tx)), %from, "evicting consumed transaction");
                self.mempool.remove(txid(&tx));
            }
        }
    }

    fn requeue(&self, txs: impl IntoIterator<Item = Transaction>) {
        for tx in txs {
            // an id already back in the pool is fine
            let _ = self.mempool.add(tx);
        }
    }

    /// Append `block` if it extends the tip and applies cleanly. On error the
    /// chain and state are unchanged.
    pub fn add_block(&self, block: Block) -> Result<(), ChainError> {
        let mut ledger = self.ledger.write();
        validate_block(&block, ledger.tip(), &self.params)
            .map_err(|e| ChainError::InvalidBlock(e.to_string()))?;

        let mut next = ledger.state.clone();
        next.apply_block(&block)
            .map_err(|e| ChainError::InvalidBlock(format!("block does not apply: {e}")))?;

        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            self.mempool.remove(txid(tx));
        }
        self.evict_consumed(&next);
        debug!(height = block.index, hash = %hex::encode(block.hash), "accepted block");
        ledger.state = next;
        ledger.blocks.push(block);

        let ledger = RwLockWriteGuard::downgrade(ledger);
        self.persist(&ledger.blocks);
        Ok(())
    }

    pub fn try_add_block(&self, block: Block) -> bool {
        match self.add_block(block) {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, "rejected block");
                false
            }
        }
    }

    /// Switch to `candidate` if it is strictly longer than the local chain,
    /// structurally valid and replays cleanly from genesis.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> Result<(), ChainError> {
        let local = self.ledger.read().blocks.len();
        if candidate.len() <= local {
            return Err(ChainError::InvalidChain(format!(
                "candidate has {} blocks, local chain has {local}",
                candidate.len()
            )));
        }
        validate_chain(&candidate, &self.params)
            .map_err(|e| ChainError::InvalidChain(e.to_string()))?;
        let state = LedgerState::from_blocks(&candidate)
            .map_err(|e| ChainError::InvalidChain(e.to_string()))?;

        let mut ledger = self.ledger.write();
        // another switch or append may have landed while validating
        if candidate.len() <= ledger.blocks.len() {
            return Err(ChainError::InvalidChain(format!(
                "candidate has {} blocks, local chain has {}",
                candidate.len(),
                ledger.blocks.len()
            )));
        }
        for tx in candidate
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| !tx.is_coinbase())
        {
            self.mempool.remove(txid(tx));
        }
        self.evict_consumed(&state);
        info!(
            from = ledger.blocks.len() - 1,
            to = candidate.len() - 1,
            "switched to longer chain"
        );
        ledger.blocks = candidate;
        ledger.state = state;

        let ledger = RwLockWriteGuard::downgrade(ledger);
        self.persist(&ledger.blocks);
        Ok(())
    }

    pub fn try_replace_chain(&self, candidate: Vec<Block>) -> bool {
        match self.replace_chain(candidate) {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, "kept local chain");
                false
            }
        }
    }

    pub fn balance(&self, addr: &Address) -> u64 {
        self.ledger.read().state.balance(addr)
    }

    /// Nonce the next transfer from `addr` must carry once its pending
    /// transfers are mined.
    pub fn next_nonce(&self, addr: &Address) -> u64 {
        self.ledger.read().state.next_nonce(addr)
    }

    pub fn total_supply(&self) -> u128 {
        self.ledger.read().state.total_supply()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.ledger.read().blocks.clone()
    }

    /// Index of the tip; 0 for a chain holding only genesis.
    pub fn height(&self) -> u64 {
        self.ledger.read().tip().index
    }

    pub fn tip(&self) -> Block {
        self.ledger.read().tip().clone()
    }

    /// True if `block` already sits in the chain at its index.
    pub fn has_block(&self, block: &Block) -> bool {
        let ledger = self.ledger.read();
        usize::try_from(block.index)
            .ok()
            .and_then(|i| ledger.blocks.get(i))
            .is_some_and(|known| known.hash == block.hash)
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.snapshot()
    }
}
