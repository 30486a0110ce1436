use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::job::{JobId, JobKind};

/// Bookkeeping for one admitted job.
#[derive(Clone, Debug)]
pub struct AdmissionEntry {
    pub kind: JobKind,
    pub start_time: Instant,
    /// Generation collaborators the job has called so far.
    pub collaborators: BTreeSet<String>,
}

impl AdmissionEntry {
    pub fn age(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Result of asking the admission set to take a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Admitted { in_flight: usize },
    Duplicate,
    AtCapacity,
}

/// In-memory set of jobs this process is executing.
///
/// Only touched synchronously; the capacity check and the insert happen
/// under one lock, so the set never grows past `capacity`.
#[derive(Debug)]
pub struct AdmissionSet {
    capacity: usize,
    entries: Mutex<HashMap<JobId, AdmissionEntry>>,
}

impl AdmissionSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn try_admit(&self, id: JobId, kind: JobKind) -> Admission {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Admission::Duplicate;
        }
        if entries.len() >= self.capacity {
            return Admission::AtCapacity;
        }
        entries.insert(
            id,
            AdmissionEntry {
                kind,
                start_time: Instant::now(),
                collaborators: BTreeSet::new(),
            },
        );
        Admission::Admitted {
            in_flight: entries.len(),
        }
    }

    pub fn release(&self, id: JobId) -> Option<AdmissionEntry> {
        self.entries.lock().remove(&id)
    }

    /// Note that `collaborator` was called on behalf of `id`.
    pub fn touch(&self, id: JobId, collaborator: &str) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            if !entry.collaborators.contains(collaborator) {
                entry.collaborators.insert(collaborator.to_string());
            }
        }
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.lock().len() >= self.capacity
    }

    pub fn snapshot(&self) -> Vec<(JobId, AdmissionEntry)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    /// Drop every entry admitted at least `threshold` ago.
    pub fn sweep_stale(&self, threshold: Duration) -> Vec<(JobId, AdmissionEntry)> {
        let mut entries = self.entries.lock();
        let stale: Vec<JobId> = entries
            .iter()
            .filter(|(_, entry)| entry.age() >= threshold)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_never_exceeded() {
        let set = AdmissionSet::new(2);
        assert_eq!(
            set.try_admit(JobId::new(), JobKind::Story),
            Admission::Admitted { in_flight: 1 }
        );
        assert_eq!(
            set.try_admit(JobId::new(), JobKind::Illustration),
            Admission::Admitted { in_flight: 2 }
        );
        assert_eq!(
            set.try_admit(JobId::new(), JobKind::Story),
            Admission::AtCapacity
        );
        assert!(set.is_full());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_duplicate_is_reported_before_capacity() {
        let set = AdmissionSet::new(1);
        let id = JobId::new();
        set.try_admit(id, JobKind::Cartoonize);
        assert_eq!(set.try_admit(id, JobKind::Cartoonize), Admission::Duplicate);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let set = AdmissionSet::new(1);
        let id = JobId::new();
        set.try_admit(id, JobKind::ColoringPage);

        let entry = set.release(id).unwrap();
        assert_eq!(entry.kind, JobKind::ColoringPage);
        assert!(set.is_empty());
        assert!(set.release(id).is_none());
    }

    #[test]
    fn test_touch_records_collaborators_once() {
        let set = AdmissionSet::new(3);
        let id = JobId::new();
        set.try_admit(id, JobKind::Story);
        set.touch(id, "story-writer");
        set.touch(id, "story-writer");
        set.touch(id, "page-illustrator");

        let (_, entry) = set.snapshot().pop().unwrap();
        assert_eq!(entry.collaborators.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_old_entries() {
        let set = AdmissionSet::new(5);
        let old = JobId::new();
        set.try_admit(old, JobKind::Story);

        tokio::time::advance(Duration::from_secs(700)).await;
        let fresh = JobId::new();
        set.try_admit(fresh, JobKind::Story);

        let evicted = set.sweep_stale(Duration::from_secs(600));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, old);
        assert!(set.contains(fresh));
    }
}
