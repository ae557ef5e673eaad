//! Scope keys: who is asking for a resource
//!
//! A [`ScopeKey`] identifies the caller a borrowed resource belongs to.
//! [`Scope`] selects how keys are derived: one shared key for the whole
//! process, the OS-thread identity, or an injected lightweight-task
//! identity (greenlet-like schedulers). The pool itself only records keys;
//! deriving them is the proxy's job.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

/// Provider returning the identity of the currently running cooperative
/// task, if any. Injected so the crate never links a specific task library.
pub type TaskKeyFn = dyn Fn() -> Option<u64> + Send + Sync;

/// Granularity of resource sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// One resource for the whole process; it must be thread-safe itself
    Shared,
    /// One resource per OS thread
    #[default]
    Thread,
    /// One resource per cooperative task, via an injected key provider.
    /// Falls back to thread identity when no provider is available.
    Task,
}

/// Identity of a resource holder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// The process-wide shared holder
    Shared,
    /// An OS thread
    Thread(ThreadId),
    /// A cooperative task, identified by the injected provider
    Task(u64),
}

impl ScopeKey {
    /// Key of the calling OS thread
    #[must_use]
    pub fn current_thread() -> Self {
        Self::Thread(thread::current().id())
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Thread(id) => write!(f, "thread:{id:?}"),
            Self::Task(id) => write!(f, "task:{id}"),
        }
    }
}

/// Derives scope keys for a configured [`Scope`].
#[derive(Clone)]
pub struct KeySource {
    scope: Scope,
    task_key: Option<Arc<TaskKeyFn>>,
}

impl KeySource {
    /// Create a key source for the given scope.
    #[must_use]
    pub fn new(scope: Scope, task_key: Option<Arc<TaskKeyFn>>) -> Self {
        Self { scope, task_key }
    }

    /// The scope this source derives keys for.
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Key identifying the current caller.
    #[must_use]
    pub fn key(&self) -> ScopeKey {
        match self.scope {
            Scope::Shared => ScopeKey::Shared,
            Scope::Thread => ScopeKey::current_thread(),
            Scope::Task => match self.task_key.as_ref().and_then(|f| f()) {
                Some(id) => ScopeKey::Task(id),
                None => ScopeKey::current_thread(),
            },
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySource")
            .field("scope", &self.scope)
            .field("has_task_key", &self.task_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_scope_is_constant() {
        let source = KeySource::new(Scope::Shared, None);
        assert_eq!(source.key(), ScopeKey::Shared);
        assert_eq!(source.key(), source.key());
    }

    #[test]
    fn thread_scope_differs_across_threads() {
        let source = KeySource::new(Scope::Thread, None);
        let here = source.key();
        let clone = source.clone();
        let there = thread::spawn(move || clone.key()).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, source.key());
    }

    #[test]
    fn task_scope_uses_provider() {
        let source = KeySource::new(Scope::Task, Some(Arc::new(|| Some(7))));
        assert_eq!(source.key(), ScopeKey::Task(7));
    }

    #[test]
    fn task_scope_falls_back_to_thread() {
        let without_provider = KeySource::new(Scope::Task, None);
        assert_eq!(without_provider.key(), ScopeKey::current_thread());

        let provider_declines = KeySource::new(Scope::Task, Some(Arc::new(|| None)));
        assert_eq!(provider_declines.key(), ScopeKey::current_thread());
    }

    #[test]
    fn keys_display_distinctly() {
        assert_eq!(ScopeKey::Shared.to_string(), "shared");
        assert_eq!(ScopeKey::Task(3).to_string(), "task:3");
        assert!(ScopeKey::current_thread().to_string().starts_with("thread:"));
    }
}
