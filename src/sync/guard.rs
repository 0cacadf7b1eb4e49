//! At most one sync per (user, account, date) at a time.

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncKey {
    pub user_id: i64,
    pub external_account_id: String,
    pub date: NaiveDate,
}

#[derive(Clone, Default)]
pub struct InFlightGuard {
    active: Arc<DashMap<SyncKey, ()>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` while another holder has it.
    pub fn try_acquire(&self, key: SyncKey) -> Option<InFlightPermit> {
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightPermit {
                    active: self.active.clone(),
                    key,
                })
            }
        }
    }

}

#[cfg(test)]
impl InFlightGuard {
    fn len(&self) -> usize {
        self.active.len()
    }

    fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Releases its key on drop.
pub struct InFlightPermit {
    active: Arc<DashMap<SyncKey, ()>>,
    key: SyncKey,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}
