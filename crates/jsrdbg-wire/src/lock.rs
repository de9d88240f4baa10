use std::panic::Location;
use std::sync::{Mutex, MutexGuard};

/// Locking that survives a panicked holder.
///
/// Every structure guarded this way stays consistent between statements, so
/// the recovered guard is safe to keep using.
pub(crate) trait LockRecovered<T> {
    fn lock_recovered(&self, what: &'static str) -> MutexGuard<'_, T>;
}

impl<T> LockRecovered<T> for Mutex<T> {
    #[track_caller]
    fn lock_recovered(&self, what: &'static str) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|poisoned| {
            let caller = Location::caller();
            tracing::error!(
                target: "jsrdbg.wire",
                what,
                at = %caller,
                "lock poisoned; recovering"
            );
            poisoned.into_inner()
        })
    }
}
