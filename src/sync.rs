use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn detached work on the ambient Tokio runtime.
///
/// Listeners run synchronously and may fire outside a runtime (e.g. from
/// plain unit tests); the work is dropped with a warning in that case.
pub(crate) fn spawn_detached<F>(what: &'static str, future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => tracing::warn!(task = what, "No async runtime, dropping background task"),
    }
}
