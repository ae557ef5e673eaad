//! Lifecycle hooks for extending pool operations with custom logic.
//!
//! Every method has a no-op default, so implementors override only what
//! they need. All hooks run with no pool lock held; a hook may therefore
//! call back into the pool, as long as it does not touch the resource it
//! was invoked for (that entry is mid-transition).
//!
//! Failure policy: [`on_get`](PoolHooks::on_get) failures retire the
//! resource and propagate to the caller; [`on_ret`](PoolHooks::on_ret)
//! failures retire the resource silently; [`on_open`](PoolHooks::on_open)
//! and [`on_close`](PoolHooks::on_close) failures are only logged. A
//! failing hook never corrupts pool invariants.

use crate::error::BoxError;

/// User callbacks fired at resource lifecycle points.
#[allow(unused_variables)]
pub trait PoolHooks<T>: Send + Sync {
    /// Called once right after the factory constructed `obj`.
    fn on_open(&self, obj: &T) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before `obj` is handed to a caller. An error destroys the
    /// resource and fails the acquisition.
    fn on_get(&self, obj: &T) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when `obj` is returned to the pool. An error retires the
    /// resource instead of recycling it.
    fn on_ret(&self, obj: &T) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called before `obj` is destroyed. Also invoked by the housekeeper
    /// to interrupt a long-held resource, so implementations should close
    /// or cancel the underlying handle if they can.
    fn on_close(&self, obj: &T) {}

    /// Liveness probe. Returning `false` retires the resource.
    fn check(&self, obj: &T) -> bool {
        true
    }

    /// Diagnostic annotation attached to per-entry statistics.
    fn trace(&self, obj: &T) -> Option<String> {
        None
    }

    /// User counters merged into the stats snapshot.
    fn stats(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Hooks implementation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHooks;

impl<T> PoolHooks<T> for NoOpHooks {}
