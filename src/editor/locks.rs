use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Per-scope mutual exclusion for edit sessions.
///
/// Exactly one session may hold a given guild's lock at a time; a second
/// acquisition attempt fails immediately rather than queuing. Entries are
/// created under the short-lived table mutex the first time a guild is
/// touched.
#[derive(Debug, Clone, Default)]
pub struct ScopeLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a guild, or `None` if a session already holds it.
    pub fn try_acquire(&self, guild_id: i64) -> Option<ScopeLockGuard> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !held.insert(guild_id) {
            return None;
        }
        Some(ScopeLockGuard {
            guild_id,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, guild_id: i64) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&guild_id)
    }
}

/// RAII handle for one guild's edit lock. Dropping the guard releases the
/// lock on every exit path of the owning session.
#[derive(Debug)]
pub struct ScopeLockGuard {
    guild_id: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for ScopeLockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_fails_fast() {
        let locks = ScopeLocks::new();
        let guard = locks.try_acquire(1).unwrap();
        assert!(locks.try_acquire(1).is_none());
        drop(guard);
    }

    #[test]
    fn drop_releases_on_every_path() {
        let locks = ScopeLocks::new();
        {
            let _guard = locks.try_acquire(1).unwrap();
            assert!(locks.is_held(1));
        }
        assert!(!locks.is_held(1));
        assert!(locks.try_acquire(1).is_some());
    }

    #[test]
    fn scopes_are_independent() {
        let locks = ScopeLocks::new();
        let _a = locks.try_acquire(1).unwrap();
        let _b = locks.try_acquire(2).unwrap();
        assert!(locks.is_held(1));
        assert!(locks.is_held(2));
        assert!(locks.try_acquire(1).is_none());
    }
}
