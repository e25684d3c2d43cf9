//! Test utilities for the ingestion pipeline.

use crate::{
    BlockTxHashes, ChainProvider, FilteredRecord, MemorySink, ResultSink, RpcError, SinkError,
    TxHash, TxRecord,
};
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Builds a deterministic [`TxRecord`] whose hash is derived from `seed`.
pub fn tx_record(seed: u64, value: u64) -> TxRecord {
    TxRecord {
        hash: tx_hash(seed),
        value: U256::from(value),
        data: Bytes::from(seed.to_be_bytes().to_vec()),
        from: Address::with_last_byte(seed as u8),
        to: Some(Address::repeat_byte(0xaa)),
        nonce: seed,
    }
}

/// The hash [`tx_record`] assigns to `seed`.
pub fn tx_hash(seed: u64) -> TxHash {
    B256::from(U256::from(seed) + U256::from(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Block(u64),
    Tx(TxHash),
}

#[derive(Debug, Clone)]
struct Script {
    remaining: Option<usize>,
    error: RpcError,
}

/// Tracks how many calls are in flight and the highest count ever seen.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

#[derive(Debug)]
struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`ChainProvider`] serving a fixed chain with scripted failures.
///
/// Blocks that were never configured are served as empty blocks. Unknown transactions are
/// [`RpcError::NotFound`].
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    blocks: HashMap<u64, Vec<TxHash>>,
    txs: HashMap<TxHash, TxRecord>,
    scripts: Mutex<HashMap<Key, Script>>,
    calls: Mutex<HashMap<Key, usize>>,
    delay: Duration,
    blocks_in_flight: InFlight,
    txs_in_flight: InFlight,
}

impl ScriptedProvider {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds block `number` containing `txs`, in order.
    pub fn with_block(mut self, number: u64, txs: Vec<TxRecord>) -> Self {
        self.blocks.insert(number, txs.iter().map(|tx| tx.hash).collect());
        self.txs.extend(txs.into_iter().map(|tx| (tx.hash, tx)));
        self
    }

    /// Adds block `number` listing `hashes` without serving their transactions.
    pub fn with_block_hashes(mut self, number: u64, hashes: Vec<TxHash>) -> Self {
        self.blocks.insert(number, hashes);
        self
    }

    /// Makes every call sleep for `delay` first.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails the next `times` fetches of block `number` with `error`.
    pub fn fail_block(self, number: u64, times: usize, error: RpcError) -> Self {
        self.script(Key::Block(number), Some(times), error)
    }

    /// Fails every fetch of block `number` with `error`.
    pub fn fail_block_always(self, number: u64, error: RpcError) -> Self {
        self.script(Key::Block(number), None, error)
    }

    /// Fails the next `times` fetches of transaction `hash` with `error`.
    pub fn fail_tx(self, hash: TxHash, times: usize, error: RpcError) -> Self {
        self.script(Key::Tx(hash), Some(times), error)
    }

    /// Fails every fetch of transaction `hash` with `error`.
    pub fn fail_tx_always(self, hash: TxHash, error: RpcError) -> Self {
        self.script(Key::Tx(hash), None, error)
    }

    fn script(self, key: Key, remaining: Option<usize>, error: RpcError) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Script { remaining, error });
        self
    }

    /// The highest number of concurrent block fetches observed.
    pub fn max_blocks_in_flight(&self) -> usize {
        self.blocks_in_flight.peak.load(Ordering::SeqCst)
    }

    /// The highest number of concurrent transaction fetches observed.
    pub fn max_txs_in_flight(&self) -> usize {
        self.txs_in_flight.peak.load(Ordering::SeqCst)
    }

    /// How many times block `number` was fetched.
    pub fn block_calls(&self, number: u64) -> usize {
        self.calls_for(Key::Block(number))
    }

    /// How many times transaction `hash` was fetched.
    pub fn tx_calls(&self, hash: TxHash) -> usize {
        self.calls_for(Key::Tx(hash))
    }

    fn calls_for(&self, key: Key) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).get(&key).copied().unwrap_or(0)
    }

    /// Counts the call and returns the scripted error, if one is due.
    fn scripted(&self, key: Key) -> Option<RpcError> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner).entry(key).or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let script = scripts.get_mut(&key)?;
        match &mut script.remaining {
            None => Some(script.error.clone()),
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some(script.error.clone())
            }
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ChainProvider for ScriptedProvider {
    async fn fetch_block(&self, number: u64) -> Result<BlockTxHashes, RpcError> {
        let _guard = self.blocks_in_flight.enter();
        self.pause().await;
        if let Some(error) = self.scripted(Key::Block(number)) {
            return Err(error);
        }
        Ok(BlockTxHashes::new(number, self.blocks.get(&number).cloned().unwrap_or_default()))
    }

    async fn fetch_transaction(&self, hash: TxHash) -> Result<TxRecord, RpcError> {
        let _guard = self.txs_in_flight.enter();
        self.pause().await;
        if let Some(error) = self.scripted(Key::Tx(hash)) {
            return Err(error);
        }
        self.txs.get(&hash).cloned().ok_or(RpcError::NotFound)
    }
}

/// A [`MemorySink`] that refuses selected records.
#[derive(Debug, Default)]
pub struct RejectingSink {
    inner: MemorySink,
    rejected: HashSet<TxHash>,
}

impl RejectingSink {
    /// Refuses every record whose hash is in `rejected`.
    pub fn new(rejected: impl IntoIterator<Item = TxHash>) -> Self {
        Self { inner: MemorySink::new(), rejected: rejected.into_iter().collect() }
    }

    /// The accepted records.
    pub fn records(&self) -> Vec<FilteredRecord> {
        self.inner.records()
    }
}

#[async_trait]
impl ResultSink for RejectingSink {
    async fn append(&self, record: FilteredRecord) -> Result<(), SinkError> {
        if self.rejected.contains(&record.hash) {
            return Err(SinkError::Rejected(format!("refused {}", record.hash)));
        }
        self.inner.append(record).await
    }
}
