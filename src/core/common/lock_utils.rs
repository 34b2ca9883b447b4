//! Lock error handling utilities.
//!
//! Std mutexes report poisoning through `PoisonError`; this helper turns it
//! into an `OxivecError` so callers can use `?`.

use crate::core::common::OxivecError;
use std::sync::{MutexGuard, PoisonError};

/// A builder bookkeeping mutex was poisoned by a panicking worker.
pub fn lock_poisoned<T>(_: PoisonError<MutexGuard<'_, T>>) -> OxivecError {
    OxivecError::Lock("bookkeeping mutex poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_lock_error_messages() {
        let mutex = Arc::new(Mutex::new(42));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        let err = mutex.lock().map_err(lock_poisoned).unwrap_err();
        assert_eq!(err.to_string(), "Lock Error: bookkeeping mutex poisoned");
    }
}
