// Copyright 2025 Martin Pool

//! Process-wide locks guarding the two heaviest, must-not-race operations:
//! image builds and call-graph builds.
//!
//! Grounded on `output/lock.rs`'s `lock.json` file lock: the teacher
//! coordinates across separate OS processes with an `flock`, but a
//! `swemutate` run is a single process with many async workers, so an
//! in-process `tokio::sync::Mutex` plays the same role without the
//! filesystem round-trip.

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Default)]
pub struct BuildLock(Mutex<()>);

impl BuildLock {
    pub fn new() -> Self {
        BuildLock(Mutex::new(()))
    }

    /// Block until no other image build is in flight, then hold the lock
    /// for the returned guard's lifetime.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        match self.0.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("waiting for another image build to finish");
                self.0.lock().await
            }
        }
    }
}

/// Serializes the per-commit call-graph build across concurrent commit
/// workers: it is the heaviest single operation in the funnel (spec.md's
/// multi-hour default timeout), and unlike image builds it has no
/// `docker inspect`-style short circuit to make concurrent callers cheap, so
/// it is guarded by its own lock rather than sharing [`BuildLock`].
#[derive(Default)]
pub struct CallGraphLock(Mutex<()>);

impl CallGraphLock {
    pub fn new() -> Self {
        CallGraphLock(Mutex::new(()))
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        match self.0.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("waiting for another commit's call-graph build to finish");
                self.0.lock().await
            }
        }
    }
}
