//! Utility functions shared across the application.

mod secret;

pub use secret::SecretString;

/// Split identifiers into batches of at most `size` items.
///
/// A `size` of zero is treated as one so the iteration always progresses.
///
/// # Example
/// ```ignore
/// let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
/// let batches: Vec<_> = batches(&ids, 2).collect();
/// // [["a", "b"], ["c"]]
/// ```
pub fn batches<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}

/// Current UTC time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
