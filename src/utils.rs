// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful helper functions shared by the jogging loops.
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Locks a mutex, recovering the data if another thread panicked while holding it.
///
/// All data guarded by the [`SharedState`](`crate::SharedState`) is replaced wholesale,
/// so a poisoned lock never contains a half-written value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// converts seconds to a Duration. Negative and non-finite values become zero.
pub fn seconds(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0. {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs(0)
    }
}

/// Determines whether every value of the slice is finite.
pub fn all_finite<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> bool {
    values.into_iter().all(|x| x.is_finite())
}
