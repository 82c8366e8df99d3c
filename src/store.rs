//! Minimal record-store contract the pipeline persists through.
//!
//! The real persistence layer (schema, migrations, queries) lives outside
//! this crate; the pipeline only needs existence checks, bulk append with
//! an explicit commit point, and read-only snapshots. [`MemoryStore`] is
//! the in-process implementation used by the CLI and tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Application, City, Offer, Person, University};

/// Store contract for one entity type.
///
/// `add` stages a record; `commit` makes the staged batch durable. Staged
/// records are already visible to `count`, `all` and `exists`, mirroring
/// how a transactional change tracker behaves before its save point.
#[async_trait]
pub trait EntityStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Number of records, staged included.
    async fn count(&self) -> Result<usize>;

    /// Read-only snapshot of all records, staged included.
    async fn all(&self) -> Result<Vec<T>>;

    /// Stages a record for the next commit.
    async fn add(&self, record: T) -> Result<()>;

    /// Makes all staged records durable.
    async fn commit(&self) -> Result<()>;

    /// Drops all staged records without committing them.
    async fn rollback(&self) -> Result<()>;

    /// Returns whether any record matches the predicate.
    async fn exists(&self, predicate: &(dyn for<'a> Fn(&'a T) -> bool + Sync)) -> Result<bool> {
        let records = self.all().await?;
        Ok(records.iter().any(|record| predicate(record)))
    }
}

struct MemoryInner<T> {
    committed: Vec<T>,
    staged: Vec<T>,
}

/// In-memory store with staged/committed batch semantics.
pub struct MemoryStore<T> {
    inner: Mutex<MemoryInner<T>>,
}

impl<T> MemoryStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                committed: Vec::new(),
                staged: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    /// Number of committed records only.
    pub fn committed_count(&self) -> usize {
        self.lock().committed.len()
    }
}

#[async_trait]
impl<T> EntityStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn count(&self) -> Result<usize> {
        let inner = self.lock();
        Ok(inner.committed.len() + inner.staged.len())
    }

    async fn all(&self) -> Result<Vec<T>> {
        let inner = self.lock();
        let mut records = inner.committed.clone();
        records.extend(inner.staged.iter().cloned());
        Ok(records)
    }

    async fn add(&self, record: T) -> Result<()> {
        self.lock().staged.push(record);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut inner = self.lock();
        let staged = std::mem::take(&mut inner.staged);
        inner.committed.extend(staged);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.lock().staged.clear();
        Ok(())
    }
}

/// The five entity stores the pipeline writes to.
#[derive(Clone)]
pub struct CrawlStore {
    pub cities: Arc<dyn EntityStore<City>>,
    pub universities: Arc<dyn EntityStore<University>>,
    pub offers: Arc<dyn EntityStore<Offer>>,
    pub applications: Arc<dyn EntityStore<Application>>,
    pub persons: Arc<dyn EntityStore<Person>>,
}

impl CrawlStore {
    /// Bundle of fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            cities: Arc::new(MemoryStore::new()),
            universities: Arc::new(MemoryStore::new()),
            offers: Arc::new(MemoryStore::new()),
            applications: Arc::new(MemoryStore::new()),
            persons: Arc::new(MemoryStore::new()),
        }
    }

    /// Drops staged records in every store.
    ///
    /// An interrupted batch must not linger: staged rows are visible to
    /// the existence checks, so a later run would skip the unit they came
    /// from and an unrelated `commit` would persist the partial batch.
    pub async fn rollback(&self) -> Result<()> {
        self.cities.rollback().await?;
        self.universities.rollback().await?;
        self.offers.rollback().await?;
        self.applications.rollback().await?;
        self.persons.rollback().await?;
        Ok(())
    }
}
