//! Typed FIFO queues over the queue database.

use std::{marker::PhantomData, num::NonZeroU64, sync::Arc};

use borsh::{BorshDeserialize, BorshSerialize};
use kiln_db::{types::QueueId, DbError};
use thiserror::Error;

use crate::ops::queue::QueueDataOps;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Underflow on peek or pop.  Callers are expected to handle this as a
    /// normal condition.
    #[error("queue is empty")]
    Empty,

    #[error("codec: {0}")]
    Codec(String),

    #[error("db: {0}")]
    Db(#[from] DbError),
}

pub fn encode_value<V: BorshSerialize>(v: &V) -> QueueResult<Vec<u8>> {
    borsh::to_vec(v).map_err(|e| QueueError::Codec(e.to_string()))
}

pub fn decode_value<V: BorshDeserialize>(buf: &[u8]) -> QueueResult<V> {
    V::try_from_slice(buf).map_err(|e| QueueError::Codec(e.to_string()))
}

fn decode_all<V: BorshDeserialize>(bufs: Vec<Vec<u8>>) -> QueueResult<Vec<V>> {
    bufs.iter().map(|b| decode_value(b)).collect()
}

/// Durable unbounded FIFO of `V`, addressed by a monotonic seq in
/// `[head, tail)`.  Every mutation is a single database transaction.
pub struct PersistentQueue<V> {
    id: QueueId,
    ops: Arc<QueueDataOps>,
    _pd: PhantomData<fn() -> V>,
}

impl<V> Clone for PersistentQueue<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            ops: self.ops.clone(),
            _pd: PhantomData,
        }
    }
}

impl<V: BorshSerialize + BorshDeserialize> PersistentQueue<V> {
    pub fn new(id: impl Into<QueueId>, ops: Arc<QueueDataOps>) -> Self {
        Self {
            id: id.into(),
            ops,
            _pd: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn push(&self, v: &V) -> QueueResult<()> {
        self.push_multi(std::slice::from_ref(v)).await
    }

    pub async fn push_multi(&self, vs: &[V]) -> QueueResult<()> {
        if vs.is_empty() {
            return Ok(());
        }
        let entries = vs.iter().map(encode_value).collect::<QueueResult<_>>()?;
        self.ops
            .push_entries_async(self.id.clone(), entries, None)
            .await?;
        Ok(())
    }

    /// Returns the oldest value without removing it.
    pub async fn peek(&self) -> QueueResult<V> {
        self.peek_multi(1).await?.pop().ok_or(QueueError::Empty)
    }

    /// Returns up to `n` of the oldest values without removing them.
    pub async fn peek_multi(&self, n: u64) -> QueueResult<Vec<V>> {
        let bufs = self.ops.get_entries_async(self.id.clone(), n).await?;
        decode_all(bufs)
    }

    pub async fn pop(&self) -> QueueResult<V> {
        self.pop_multi(1).await?.pop().ok_or(QueueError::Empty)
    }

    /// Pops up to `n` values.  Returns fewer if the queue runs out first, which
    /// isn't an error.
    pub async fn pop_multi(&self, n: u64) -> QueueResult<Vec<V>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let bufs = self.ops.pop_entries_async(self.id.clone(), n).await?;
        decode_all(bufs)
    }

    pub async fn len(&self) -> QueueResult<u64> {
        Ok(self
            .ops
            .get_queue_bounds_async(self.id.clone())
            .await?
            .len())
    }

    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// A [`PersistentQueue`] holding at most `capacity` values.  Pushing onto a
/// full queue drops the oldest value in the same transaction and hands it
/// back.
pub struct CircularQueue<V> {
    inner: PersistentQueue<V>,
    capacity: NonZeroU64,
}

impl<V> Clone for CircularQueue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            capacity: self.capacity,
        }
    }
}

impl<V: BorshSerialize + BorshDeserialize> CircularQueue<V> {
    pub fn new(id: impl Into<QueueId>, ops: Arc<QueueDataOps>, capacity: NonZeroU64) -> Self {
        Self {
            inner: PersistentQueue::new(id, ops),
            capacity,
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.get()
    }

    /// Pushes a value, returning the evicted oldest value if the queue was
    /// full.
    pub async fn push(&self, v: &V) -> QueueResult<Option<V>> {
        let mut evicted = self.push_multi(std::slice::from_ref(v)).await?;
        Ok(evicted.pop())
    }

    /// Pushes values in order, returning every value evicted to make room,
    /// oldest first.  Values from `vs` itself can be evicted if there are more
    /// than `capacity` of them.
    pub async fn push_multi(&self, vs: &[V]) -> QueueResult<Vec<V>> {
        if vs.is_empty() {
            return Ok(Vec::new());
        }
        let entries = vs.iter().map(encode_value).collect::<QueueResult<_>>()?;
        let out = self
            .inner
            .ops
            .push_entries_async(self.inner.id.clone(), entries, Some(self.capacity()))
            .await?;
        decode_all(out.evicted)
    }

    pub async fn peek(&self) -> QueueResult<V> {
        self.inner.peek().await
    }

    pub async fn peek_multi(&self, n: u64) -> QueueResult<Vec<V>> {
        self.inner.peek_multi(n).await
    }

    pub async fn pop(&self) -> QueueResult<V> {
        self.inner.pop().await
    }

    pub async fn pop_multi(&self, n: u64) -> QueueResult<Vec<V>> {
        self.inner.pop_multi(n).await
    }

    pub async fn len(&self) -> QueueResult<u64> {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> QueueResult<bool> {
        self.inner.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use kiln_db::{stubs::ingest::StubIngestDb, traits::MockQueueDatabase};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use threadpool::ThreadPool;

    use super::*;
    use crate::ops::queue::Context;

    fn setup_ops() -> Arc<QueueDataOps> {
        let db = Arc::new(StubIngestDb::new());
        let pool = ThreadPool::new(2);
        Arc::new(Context::new(db).into_ops(pool))
    }

    #[tokio::test]
    async fn test_empty_queue_signals_empty() {
        let q = PersistentQueue::<u64>::new("q", setup_ops());
        assert!(matches!(q.peek().await, Err(QueueError::Empty)));
        assert!(matches!(q.pop().await, Err(QueueError::Empty)));
        assert!(q.pop_multi(4).await.unwrap().is_empty());
        assert_eq!(q.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let q = PersistentQueue::<String>::new("q", setup_ops());
        q.push(&"a".to_owned()).await.unwrap();
        q.push(&"b".to_owned()).await.unwrap();

        assert_eq!(q.peek().await.unwrap(), "a");
        assert_eq!(q.peek().await.unwrap(), "a");
        assert_eq!(q.len().await.unwrap(), 2);
        assert_eq!(q.peek_multi(5).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_pop_multi_returns_what_is_there() {
        let q = PersistentQueue::<u64>::new("q", setup_ops());
        q.push_multi(&[1, 2, 3]).await.unwrap();

        assert_eq!(q.pop_multi(2).await.unwrap(), vec![1, 2]);
        assert_eq!(q.pop_multi(10).await.unwrap(), vec![3]);
        assert!(q.pop_multi(10).await.unwrap().is_empty());
        assert!(q.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_fifo_under_random_interleaving() {
        let q = PersistentQueue::<u64>::new("q", setup_ops());
        let mut rng = StdRng::seed_from_u64(0x6b696c6e);

        let mut next = 0u64;
        let mut popped = Vec::new();
        for _ in 0..200 {
            if rng.gen_bool(0.6) {
                q.push(&next).await.unwrap();
                next += 1;
            } else {
                let n = rng.gen_range(0..4);
                popped.extend(q.pop_multi(n).await.unwrap());
            }
        }
        popped.extend(q.pop_multi(u64::MAX).await.unwrap());

        assert_eq!(popped, (0..next).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_queues_share_ops() {
        let ops = setup_ops();
        let a = PersistentQueue::<u64>::new("a", ops.clone());
        let b = PersistentQueue::<u64>::new("b", ops);
        a.push(&1).await.unwrap();
        b.push(&2).await.unwrap();
        assert_eq!(b.pop().await.unwrap(), 2);
        assert_eq!(a.pop().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_circular_evicts_oldest() {
        let cap = NonZeroU64::new(3).unwrap();
        let q = CircularQueue::<String>::new("ring", setup_ops(), cap);

        for v in ["a", "b", "c"] {
            assert_eq!(q.push(&v.to_owned()).await.unwrap(), None);
        }
        let evicted = q.push(&"d".to_owned()).await.unwrap();
        assert_eq!(evicted.as_deref(), Some("a"));
        assert_eq!(q.peek().await.unwrap(), "b");
        assert_eq!(q.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_circular_keeps_last_capacity_values() {
        let cap = NonZeroU64::new(4).unwrap();
        let q = CircularQueue::<u64>::new("ring", setup_ops(), cap);

        for i in 0..25u64 {
            q.push(&i).await.unwrap();
            let len = q.len().await.unwrap();
            assert!(len <= cap.get());

            let lo = (i + 1).saturating_sub(cap.get());
            assert_eq!(q.peek_multi(cap.get()).await.unwrap(), (lo..=i).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_circular_push_multi_overflowing_batch() {
        let cap = NonZeroU64::new(2).unwrap();
        let q = CircularQueue::<u64>::new("ring", setup_ops(), cap);
        let evicted = q.push_multi(&[1, 2, 3, 4, 5]).await.unwrap();
        assert_eq!(evicted, vec![1, 2, 3]);
        assert_eq!(q.pop_multi(10).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_db_failure_is_not_empty() {
        let mut mock = MockQueueDatabase::new();
        mock.expect_pop_entries()
            .returning(|_, _| Err(DbError::Busy));
        let ops = Arc::new(Context::new(Arc::new(mock)).into_ops(ThreadPool::new(1)));

        let q = PersistentQueue::<u64>::new("q", ops);
        assert!(matches!(q.pop().await, Err(QueueError::Db(DbError::Busy))));
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        let res = decode_value::<kiln_primitives::payload::Deposit>(&[1, 2, 3]);
        assert!(matches!(res, Err(QueueError::Codec(_))));
    }
}
