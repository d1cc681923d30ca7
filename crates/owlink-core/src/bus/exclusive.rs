//! Per-adapter exclusive-use token.
//!
//! A multi-step 1-Wire transaction (reset, match ROM, function command,
//! read back) must not interleave with another caller's traffic.  Callers
//! bracket such sequences with `begin_exclusive` / `end_exclusive`, and the
//! adapter backs those with an [`ExclusivityToken`].
//!
//! Ownership is tracked by an explicit [`OwnerId`] rather than by thread
//! identity, so a network session served by one thread and a local caller
//! juggling several threads both work the same way.  Acquisition is
//! re-entrant for the current owner.
//!
//! The token is also the gate every primitive passes through: an adapter
//! calls [`ExclusivityToken::admit`] to lock its own state, and only gets the
//! guard while the token is free or held by the calling owner.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Default bound on a blocking `begin_exclusive`.
pub const DEFAULT_EXCLUSIVE_WAIT: Duration = Duration::from_secs(10);

/// Opaque handle identifying one logical user of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Mints a process-unique owner id.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Mutual-exclusion token with a condition variable for blocking waiters.
#[derive(Debug, Default)]
pub struct ExclusivityToken {
    holder: Mutex<Option<OwnerId>>,
    released: Condvar,
}

impl ExclusivityToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<OwnerId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the token if it is free or already held by `owner`.
    pub fn try_acquire(&self, owner: OwnerId) -> bool {
        let mut holder = self.lock();
        match *holder {
            None => {
                *holder = Some(owner);
                debug!(%owner, "exclusive use granted");
                true
            }
            Some(current) => current == owner,
        }
    }

    /// Waits up to `timeout` for the token.  Returns `false` on timeout.
    pub fn acquire_timeout(&self, owner: OwnerId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut holder = self.lock();
        loop {
            match *holder {
                None => {
                    *holder = Some(owner);
                    debug!(%owner, "exclusive use granted after wait");
                    return true;
                }
                Some(current) if current == owner => return true,
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(%owner, "timed out waiting for exclusive use");
                return false;
            }
            holder = self
                .released
                .wait_timeout(holder, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Releases the token if `owner` holds it.  Returns `true` if released.
    pub fn release(&self, owner: OwnerId) -> bool {
        let mut holder = self.lock();
        if *holder == Some(owner) {
            *holder = None;
            drop(holder);
            self.released.notify_all();
            debug!(%owner, "exclusive use released");
            true
        } else {
            false
        }
    }

    /// Releases the token regardless of holder, returning the previous one.
    pub fn force_release(&self) -> Option<OwnerId> {
        let previous = self.lock().take();
        if previous.is_some() {
            self.released.notify_all();
        }
        previous
    }

    pub fn holder(&self) -> Option<OwnerId> {
        *self.lock()
    }

    /// `true` if `owner` may use the adapter right now.
    pub fn admits(&self, owner: OwnerId) -> bool {
        self.lock().map_or(true, |holder| holder == owner)
    }

    /// Waits up to `timeout` until the token admits `owner`, without taking
    /// it.  Returns the holder that kept `owner` out on timeout.
    pub fn wait_admitted(&self, owner: OwnerId, timeout: Duration) -> Result<(), OwnerId> {
        let deadline = Instant::now() + timeout;
        let mut holder = self.lock();
        loop {
            match *holder {
                Some(current) if current != owner => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(current);
                    }
                    holder = self
                        .released
                        .wait_timeout(holder, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Locks `state` on behalf of `owner` once the token admits it.
    ///
    /// The admission check runs with `state` locked.  A primitive holding
    /// the guard may finish after another owner's `begin_exclusive`, but the
    /// bracketed sequence cannot touch `state` until the guard is dropped.
    /// Gives up after `timeout` and returns the holder.
    pub fn admit<'a, S>(
        &self,
        owner: OwnerId,
        state: &'a Mutex<S>,
        timeout: Duration,
    ) -> Result<MutexGuard<'a, S>, OwnerId> {
        let deadline = Instant::now() + timeout;
        loop {
            let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            if self.admits(owner) {
                return Ok(guard);
            }
            drop(guard);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(holder) = self.wait_admitted(owner, remaining) {
                debug!(%owner, %holder, "kept out by exclusive use");
                return Err(holder);
            }
        }
    }

    pub fn is_held_by(&self, owner: OwnerId) -> bool {
        self.holder() == Some(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_owner_ids_are_unique() {
        assert_ne!(OwnerId::new(), OwnerId::new());
    }

    #[test]
    fn test_try_acquire_is_reentrant_for_holder() {
        let token = ExclusivityToken::new();
        let owner = OwnerId::new();
        assert!(token.try_acquire(owner));
        assert!(token.try_acquire(owner));
        assert!(token.is_held_by(owner));
    }

    #[test]
    fn test_try_acquire_fails_for_other_owner() {
        let token = ExclusivityToken::new();
        let a = OwnerId::new();
        let b = OwnerId::new();
        assert!(token.try_acquire(a));
        assert!(!token.try_acquire(b));
        assert_eq!(token.holder(), Some(a));
    }

    #[test]
    fn test_release_by_non_holder_is_ignored() {
        let token = ExclusivityToken::new();
        let a = OwnerId::new();
        token.try_acquire(a);
        assert!(!token.release(OwnerId::new()));
        assert!(token.is_held_by(a));
    }

    #[test]
    fn test_acquire_timeout_gives_up() {
        let token = ExclusivityToken::new();
        token.try_acquire(OwnerId::new());
        let started = Instant::now();
        assert!(!token.acquire_timeout(OwnerId::new(), Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_blocked_waiter_wakes_on_release() {
        // Arrange
        let token = Arc::new(ExclusivityToken::new());
        let first = OwnerId::new();
        let second = OwnerId::new();
        assert!(token.try_acquire(first));

        // Act
        let waiter = {
            let token = Arc::clone(&token);
            thread::spawn(move || token.acquire_timeout(second, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        token.release(first);

        // Assert
        assert!(waiter.join().unwrap());
        assert!(token.is_held_by(second));
    }

    #[test]
    fn test_admits_only_free_token_or_holder() {
        let token = ExclusivityToken::new();
        let a = OwnerId::new();
        let b = OwnerId::new();
        assert!(token.admits(b));

        token.try_acquire(a);

        assert!(token.admits(a));
        assert!(!token.admits(b));
    }

    #[test]
    fn test_admit_locks_state_for_holder_without_waiting() {
        // Arrange
        let token = ExclusivityToken::new();
        let state = Mutex::new(0u32);
        let owner = OwnerId::new();
        token.try_acquire(owner);

        // Act
        let guard = token.admit(owner, &state, Duration::ZERO);

        // Assert
        assert!(guard.is_ok());
    }

    #[test]
    fn test_admit_refuses_other_owner_after_timeout() {
        // Arrange
        let token = ExclusivityToken::new();
        let state = Mutex::new(0u32);
        let holder = OwnerId::new();
        token.try_acquire(holder);
        let started = Instant::now();

        // Act
        let result = token.admit(OwnerId::new(), &state, Duration::from_millis(50));

        // Assert
        assert_eq!(result.err(), Some(holder));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_admit_proceeds_once_holder_releases() {
        // Arrange
        let token = Arc::new(ExclusivityToken::new());
        let state = Arc::new(Mutex::new(Vec::new()));
        let holder = OwnerId::new();
        let waiter = OwnerId::new();
        token.try_acquire(holder);

        // Act: the waiter blocks until the holder has written and released
        let handle = {
            let token = Arc::clone(&token);
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let mut guard = token
                    .admit(waiter, &state, Duration::from_secs(5))
                    .expect("admitted after release");
                guard.push("waiter");
            })
        };
        thread::sleep(Duration::from_millis(30));
        token
            .admit(holder, &state, Duration::ZERO)
            .expect("holder is admitted")
            .push("holder");
        token.release(holder);
        handle.join().unwrap();

        // Assert
        assert_eq!(*state.lock().unwrap(), vec!["holder", "waiter"]);
        assert_eq!(token.holder(), None);
    }

    #[test]
    fn test_force_release_clears_any_holder() {
        let token = ExclusivityToken::new();
        let a = OwnerId::new();
        token.try_acquire(a);
        assert_eq!(token.force_release(), Some(a));
        assert_eq!(token.holder(), None);
    }
}
