use async_trait::async_trait;
use kiln::store::{JobRow, KindTables};
use kiln::{Job, JobFilter, JobId, JobKind, JobStatus, StoreError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Per-kind tables held in memory, with hooks for injecting failures and
/// observing how the router probes them.
#[derive(Clone, Default)]
pub struct InMemoryTables {
    tables: Arc<Mutex<HashMap<JobKind, HashMap<JobId, JobRow>>>>,
    failing: Arc<Mutex<HashSet<JobKind>>>,
    probes: Arc<Mutex<HashMap<JobKind, usize>>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `kind`'s table fail as unavailable.
    pub fn fail_kind(&self, kind: JobKind) {
        self.failing.lock().insert(kind);
    }

    pub fn heal_kind(&self, kind: JobKind) {
        self.failing.lock().remove(&kind);
    }

    /// Delay every operation, so concurrent callers overlap.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of single-row fetches issued against `kind`'s table.
    pub fn probe_count(&self, kind: JobKind) -> usize {
        self.probes.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_probes(&self) -> usize {
        self.probes.lock().values().sum()
    }

    pub fn reset_probes(&self) {
        self.probes.lock().clear();
    }

    /// Write a job straight into its table, bypassing the router.
    pub fn seed(&self, job: &Job) {
        let row = JobRow::from_job(job);
        self.tables
            .lock()
            .entry(row.kind())
            .or_default()
            .insert(row.id(), row);
    }

    /// Raw row for `id`, from whichever table holds it.
    pub fn row(&self, id: JobId) -> Option<JobRow> {
        self.tables
            .lock()
            .values()
            .find_map(|table| table.get(&id).cloned())
    }

    /// Kind of the table holding `id`.
    pub fn kind_of(&self, id: JobId) -> Option<JobKind> {
        self.tables
            .lock()
            .iter()
            .find(|(_, table)| table.contains_key(&id))
            .map(|(kind, _)| *kind)
    }

    pub fn len(&self, kind: JobKind) -> usize {
        self.tables.lock().get(&kind).map_or(0, HashMap::len)
    }

    /// Remove a row behind the router's back.
    pub fn delete(&self, id: JobId) -> Option<JobRow> {
        self.tables
            .lock()
            .values_mut()
            .find_map(|table| table.remove(&id))
    }

    async fn enter(&self, kind: JobKind) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(&kind) {
            return Err(StoreError::Unavailable(format!(
                "{} is unavailable",
                kind.table()
            )));
        }
        Ok(())
    }

    fn matching(&self, kind: JobKind, keep: impl Fn(&JobRow) -> bool) -> Vec<JobRow> {
        self.tables
            .lock()
            .get(&kind)
            .map(|table| table.values().filter(|row| keep(row)).cloned().collect())
            .unwrap_or_default()
    }
}

fn owner_matches(filter: &JobFilter, row: &JobRow) -> bool {
    filter
        .owner_id
        .as_deref()
        .map_or(true, |owner| row.common.owner_id.as_deref() == Some(owner))
}

#[async_trait]
impl KindTables for InMemoryTables {
    async fn fetch(&self, kind: JobKind, id: JobId) -> Result<Option<JobRow>, StoreError> {
        *self.probes.lock().entry(kind).or_default() += 1;
        self.enter(kind).await?;
        Ok(self
            .tables
            .lock()
            .get(&kind)
            .and_then(|table| table.get(&id).cloned()))
    }

    async fn fetch_pending(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError> {
        self.enter(kind).await?;
        let mut rows = self.matching(kind, |row| {
            row.common.status == JobStatus::Pending.as_str() && owner_matches(filter, row)
        });
        rows.sort_by_key(|row| row.common.created_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn fetch_filtered(
        &self,
        kind: JobKind,
        filter: &JobFilter,
        limit: usize,
    ) -> Result<Vec<JobRow>, StoreError> {
        self.enter(kind).await?;
        let mut rows = self.matching(kind, |row| {
            owner_matches(filter, row)
                && filter
                    .status
                    .map_or(true, |status| row.common.status == status.as_str())
        });
        rows.sort_by_key(|row| std::cmp::Reverse(row.common.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert(&self, row: &JobRow) -> Result<(), StoreError> {
        self.enter(row.kind()).await?;
        let mut tables = self.tables.lock();
        let table = tables.entry(row.kind()).or_default();
        if table.contains_key(&row.id()) {
            return Err(StoreError::Database(format!(
                "duplicate key {} in {}",
                row.id(),
                row.table()
            )));
        }
        table.insert(row.id(), row.clone());
        Ok(())
    }

    async fn update(&self, row: &JobRow) -> Result<bool, StoreError> {
        self.enter(row.kind()).await?;
        let mut tables = self.tables.lock();
        match tables
            .get_mut(&row.kind())
            .and_then(|table| table.get_mut(&row.id()))
        {
            Some(existing) => {
                *existing = row.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
