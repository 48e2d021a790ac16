// src/quota/mod.rs — Daily usage gate for anonymous visitors
//
// Authenticated callers never construct a guard; the gate is scoped to
// guest traffic only. Persistence is an injected key/value collaborator so
// tests (and embedders with their own storage) can substitute the backend.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::infra::paths;

/// Messages per day an anonymous visitor may send.
pub const GUEST_DAILY_LIMIT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub count: u32,
    pub date: NaiveDate,
}

impl QuotaRecord {
    pub fn fresh(date: NaiveDate) -> Self {
        Self { count: 0, date }
    }
}

/// Key/value persistence for the quota record. `load` returns `None` when
/// the record is missing or corrupt; `save` is best-effort.
pub trait QuotaStore: Send + Sync {
    fn load(&self) -> Option<QuotaRecord>;
    fn save(&self, record: &QuotaRecord);
}

impl<T: QuotaStore + ?Sized> QuotaStore for std::sync::Arc<T> {
    fn load(&self) -> Option<QuotaRecord> {
        (**self).load()
    }

    fn save(&self, record: &QuotaRecord) {
        (**self).save(record)
    }
}

/// In-memory store for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryQuotaStore {
    record: Mutex<Option<QuotaRecord>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(record: QuotaRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl QuotaStore for MemoryQuotaStore {
    fn load(&self) -> Option<QuotaRecord> {
        self.record.lock().unwrap().clone()
    }

    fn save(&self, record: &QuotaRecord) {
        *self.record.lock().unwrap() = Some(record.clone());
    }
}

/// JSON file store, one record per file.
pub struct FileQuotaStore {
    path: PathBuf,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default state location.
    pub fn default_path() -> Self {
        Self::new(paths::quota_path())
    }
}

impl QuotaStore for FileQuotaStore {
    fn load(&self) -> Option<QuotaRecord> {
        let data = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn save(&self, record: &QuotaRecord) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Cannot create quota dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("Cannot persist quota record: {e}");
                }
            }
            Err(e) => tracing::warn!("Cannot serialize quota record: {e}"),
        }
    }
}

/// Tracks per-day usage and blocks once the ceiling is reached.
pub struct QuotaGuard {
    store: Box<dyn QuotaStore>,
    record: Mutex<QuotaRecord>,
    limit: u32,
}

impl QuotaGuard {
    pub fn new(store: Box<dyn QuotaStore>) -> Self {
        Self::with_limit(store, GUEST_DAILY_LIMIT)
    }

    pub fn with_limit(store: Box<dyn QuotaStore>, limit: u32) -> Self {
        let record = store
            .load()
            .unwrap_or_else(|| QuotaRecord::fresh(today()));
        Self {
            store,
            record: Mutex::new(record),
            limit,
        }
    }

    /// Reset the record when the stored day is no longer today, persisting
    /// the reset before the new call is evaluated.
    fn roll_over(&self, record: &mut QuotaRecord) {
        let today = today();
        if record.date != today {
            *record = QuotaRecord::fresh(today);
            self.store.save(record);
        }
    }

    /// Whether another send is allowed today.
    pub fn check(&self) -> bool {
        let mut record = self.record.lock().unwrap();
        self.roll_over(&mut record);
        record.count < self.limit
    }

    /// Record one permitted send.
    pub fn consume(&self) {
        let mut record = self.record.lock().unwrap();
        self.roll_over(&mut record);
        record.count += 1;
        self.store.save(&record);
    }

    pub fn remaining(&self) -> u32 {
        let mut record = self.record.lock().unwrap();
        self.roll_over(&mut record);
        self.limit.saturating_sub(record.count)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn yesterday() -> NaiveDate {
        today().checked_sub_days(Days::new(1)).unwrap()
    }

    #[test]
    fn test_fresh_guard_allows_up_to_limit() {
        let guard = QuotaGuard::new(Box::new(MemoryQuotaStore::new()));
        assert!(guard.check());
        guard.consume();
        assert!(guard.check());
        guard.consume();
        assert!(!guard.check());
        assert_eq!(guard.remaining(), 0);
    }

    #[test]
    fn test_exhausted_today_blocks() {
        let store = MemoryQuotaStore::seeded(QuotaRecord {
            count: 2,
            date: today(),
        });
        let guard = QuotaGuard::new(Box::new(store));
        assert!(!guard.check());
    }

    #[test]
    fn test_day_rollover_resets_and_persists() {
        let store = std::sync::Arc::new(MemoryQuotaStore::seeded(QuotaRecord {
            count: 2,
            date: yesterday(),
        }));
        let guard = QuotaGuard::new(Box::new(store.clone()));

        assert!(guard.check());
        assert_eq!(store.load().unwrap(), QuotaRecord::fresh(today()));
    }

    #[test]
    fn test_consume_persists_count_and_date() {
        let store = std::sync::Arc::new(MemoryQuotaStore::seeded(QuotaRecord {
            count: 1,
            date: yesterday(),
        }));
        let guard = QuotaGuard::new(Box::new(store.clone()));

        guard.consume();

        let record = store.load().unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.date, today());
    }

    #[test]
    fn test_corrupt_store_treated_as_fresh() {
        struct Corrupt;
        impl QuotaStore for Corrupt {
            fn load(&self) -> Option<QuotaRecord> {
                None
            }
            fn save(&self, _: &QuotaRecord) {}
        }
        let guard = QuotaGuard::new(Box::new(Corrupt));
        assert!(guard.check());
        assert_eq!(guard.remaining(), GUEST_DAILY_LIMIT);
    }
}
