//! Type aliases for commonly used shared types.
//!
//! The engine is driven from one dispatch thread, but the motion consumer,
//! the simulated collaborators and interrupt-style signal sources all share
//! state with it. These aliases name the wrappers used for that sharing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcodexec_core::types::*;
//!
//! // Instead of: Arc<Mutex<Vec<String>>>
//! let log: ThreadSafeVec<String> = thread_safe_vec();
//! log.lock().push("G1 X10".to_string());
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// THREAD-SAFE SHARED TYPES (Arc<Mutex<T>>)
// =============================================================================

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
///
/// Uses `parking_lot::Mutex` for better performance than `std::sync::Mutex`.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe vector for cross-thread collection management.
pub type ThreadSafeVec<T> = Arc<Mutex<Vec<T>>>;

/// A thread-safe hash map for cross-thread key-value storage.
pub type ThreadSafeMap<K, V> = Arc<Mutex<HashMap<K, V>>>;

// =============================================================================
// CONSTRUCTOR HELPERS
// =============================================================================

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new empty `ThreadSafeVec<T>`.
#[inline]
pub fn thread_safe_vec<T>() -> ThreadSafeVec<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Create a new empty `ThreadSafeMap<K, V>`.
#[inline]
pub fn thread_safe_map<K, V>() -> ThreadSafeMap<K, V> {
    Arc::new(Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_safe_shared_between_clones() {
        let state: ThreadSafe<i32> = thread_safe(42);
        let other = state.clone();
        *other.lock() = 7;
        assert_eq!(*state.lock(), 7);
    }

    #[test]
    fn test_thread_safe_collections() {
        let map: ThreadSafeMap<String, u32> = thread_safe_map();
        map.lock().insert("tool".to_string(), 1);
        assert_eq!(map.lock().get("tool"), Some(&1));

        let log: ThreadSafeVec<String> = thread_safe_vec();
        log.lock().push("G28".to_string());
        assert_eq!(log.lock().len(), 1);
    }
}
