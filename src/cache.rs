// Time-boxed cache cell shared by all sources.

use std::time::Duration;

/// A single cached value with the time it was last refreshed.
///
/// A read inside the TTL window returns the cached value unchanged. Outside the
/// window the caller refreshes; if the refresh fails the stale value is still
/// served in preference to nothing.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: Option<T>,
    refreshed_at_ms: Option<u64>,
    ttl: Duration,
}

impl<T: Clone> CacheEntry<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            refreshed_at_ms: None,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// True when a value exists and `now - refreshed_at < ttl`.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        match (self.refreshed_at_ms, &self.value) {
            (Some(at), Some(_)) => now_ms.saturating_sub(at) < self.ttl.as_millis() as u64,
            _ => false,
        }
    }

    pub fn fresh(&self, now_ms: u64) -> Option<&T> {
        if self.is_fresh(now_ms) {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// Last stored value regardless of age.
    pub fn stale(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn last_refreshed_ms(&self) -> Option<u64> {
        self.refreshed_at_ms
    }

    pub fn store(&mut self, value: T, now_ms: u64) {
        self.value = Some(value);
        self.refreshed_at_ms = Some(now_ms);
    }

    pub fn invalidate(&mut self) {
        self.value = None;
        self.refreshed_at_ms = None;
    }

    /// Fresh value, else `refresh()`; a failed refresh falls back to the stale value.
    /// The refresh timestamp only moves on success, so a failure is retried next call.
    pub fn get_or_refresh<E>(
        &mut self,
        now_ms: u64,
        refresh: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(v) = self.fresh(now_ms) {
            return Ok(v.clone());
        }
        match refresh() {
            Ok(v) => {
                self.store(v.clone(), now_ms);
                Ok(v)
            }
            Err(e) => match self.value.as_ref() {
                Some(stale) => Ok(stale.clone()),
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_fresh_strictly_inside_ttl() {
        let mut entry = CacheEntry::new(Duration::from_millis(500));
        entry.store(7u32, 1_000);
        assert_eq!(entry.fresh(1_000), Some(&7));
        assert_eq!(entry.fresh(1_499), Some(&7));
        assert_eq!(entry.fresh(1_500), None);
        assert_eq!(entry.stale(), Some(&7));
    }

    #[test]
    fn empty_entry_is_never_fresh() {
        let entry: CacheEntry<u32> = CacheEntry::new(Duration::from_secs(60));
        assert!(!entry.is_fresh(0));
        assert!(entry.stale().is_none());
    }

    #[test]
    fn get_or_refresh_skips_refresh_while_fresh() {
        let mut entry = CacheEntry::new(Duration::from_millis(100));
        entry.store(1u32, 0);
        let mut called = false;
        let v: Result<u32, ()> = entry.get_or_refresh(50, || {
            called = true;
            Ok(2)
        });
        assert_eq!(v, Ok(1));
        assert!(!called);
    }

    #[test]
    fn failed_refresh_serves_stale_and_keeps_timestamp() {
        let mut entry = CacheEntry::new(Duration::from_millis(100));
        entry.store(1u32, 0);
        let v: Result<u32, &str> = entry.get_or_refresh(200, || Err("gone"));
        assert_eq!(v, Ok(1));
        assert_eq!(entry.last_refreshed_ms(), Some(0));
    }

    #[test]
    fn failed_refresh_without_value_is_an_error() {
        let mut entry: CacheEntry<u32> = CacheEntry::new(Duration::from_millis(100));
        let v: Result<u32, &str> = entry.get_or_refresh(0, || Err("gone"));
        assert_eq!(v, Err("gone"));
    }

    #[test]
    fn invalidate_forces_refresh() {
        let mut entry = CacheEntry::new(Duration::from_secs(10));
        entry.store(1u32, 0);
        entry.invalidate();
        let v: Result<u32, ()> = entry.get_or_refresh(1, || Ok(9));
        assert_eq!(v, Ok(9));
    }
}
