use std::collections::BTreeMap;

use futures::future::{BoxFuture, Shared};

use super::errors::ValidationError;

/// Target of a validation result: one named field, or the form as a whole.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum CacheKey {
    WholeForm,
    Field(String),
}

impl CacheKey {
    pub fn field(name: impl Into<String>) -> Self {
        CacheKey::Field(name.into())
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            CacheKey::Field(name) => Some(name),
            CacheKey::WholeForm => None,
        }
    }

    pub fn is_whole_form(&self) -> bool {
        matches!(self, CacheKey::WholeForm)
    }
}

/// Handle to an outstanding validation task. Cloned by every caller that has
/// to wait for it; the task itself records its outcome into the cache.
pub(super) type ValidationHandle = Shared<BoxFuture<'static, ()>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct Ticket(u64);

/// One memoized validation outcome. Absence from the cache map plays the role
/// of the `Absent` state.
#[derive(Clone)]
pub(super) enum CacheEntry {
    Pending { ticket: Ticket, task: ValidationHandle },
    Valid,
    Invalid(ValidationError),
}

/// Per-form memo of validation outcomes. Owned and mutated exclusively by the
/// form; fields never touch it. Pending entries carry a ticket so that a task
/// whose entry was invalidated mid-flight has its late result discarded.
#[derive(Default)]
pub(super) struct ValidationCache {
    entries: BTreeMap<CacheKey, CacheEntry>,
    next_ticket: u64,
}

impl ValidationCache {
    pub(super) fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    pub(super) fn allocate_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    pub(super) fn insert_pending(&mut self, key: CacheKey, ticket: Ticket, task: ValidationHandle) {
        self.entries.insert(key, CacheEntry::Pending { ticket, task });
    }

    /// Record a settled outcome, but only if the entry still belongs to the
    /// task holding `ticket`; otherwise the result is stale and dropped.
    pub(super) fn settle(
        &mut self,
        key: &CacheKey,
        ticket: Ticket,
        outcome: Result<(), ValidationError>,
    ) -> bool {
        match self.entries.get(key) {
            Some(CacheEntry::Pending { ticket: current, .. }) if *current == ticket => {
                let entry = match outcome {
                    Ok(()) => CacheEntry::Valid,
                    Err(error) => CacheEntry::Invalid(error),
                };
                self.entries.insert(key.clone(), entry);
                true
            }
            _ => false,
        }
    }

    /// Invalidate one field's entry along with the whole-form entry, since
    /// overall validity may have changed with it.
    pub(super) fn invalidate_field(&mut self, name: &str) {
        self.entries.remove(&CacheKey::field(name));
        self.entries.remove(&CacheKey::WholeForm);
    }

    pub(super) fn invalidate_form(&mut self) {
        self.entries.remove(&CacheKey::WholeForm);
    }

    pub(super) fn clear(&mut self) {
        self.entries.clear();
    }
}
