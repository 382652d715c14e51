// ================================
// src/slot.rs - single-slot leader pose cell
// ================================
use std::sync::{Mutex, PoisonError};

use crate::pose::Pose2D;

/// Latest leader pose, written by the leader-feed callback and read by the
/// own-pose callback, possibly from different worker threads.
///
/// The lock is held only to copy a `Pose2D` in or out, so readers always see
/// a whole pose and "has a target" is the same fact as "slot is filled".
#[derive(Debug, Default)]
pub struct LeaderSlot {
    pose: Mutex<Option<Pose2D>>,
}

impl LeaderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored pose.
    pub fn set(&self, pose: Pose2D) {
        // A poisoned slot still holds a whole `Copy` value.
        let mut guard = self.pose.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(pose);
    }

    /// Snapshot of the stored pose, `None` until the first `set`.
    pub fn get(&self) -> Option<Pose2D> {
        *self.pose.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_target(&self) -> bool {
        self.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn empty_until_first_set() {
        let slot = LeaderSlot::new();
        assert!(!slot.has_target());
        assert_eq!(slot.get(), None);

        slot.set(Pose2D::new(1.0, 2.0, 0.5));
        assert!(slot.has_target());
        assert_eq!(slot.get(), Some(Pose2D::new(1.0, 2.0, 0.5)));
    }

    #[test]
    fn set_replaces_whole_pose() {
        let slot = LeaderSlot::new();
        slot.set(Pose2D::new(1.0, 1.0, 1.0));
        slot.set(Pose2D::new(2.0, 3.0, -1.0));
        assert_eq!(slot.get(), Some(Pose2D::new(2.0, 3.0, -1.0)));
    }

    #[test]
    fn concurrent_readers_never_see_torn_pose() {
        let slot = Arc::new(LeaderSlot::new());

        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..20_000 {
                    let v = i as f64;
                    slot.set(Pose2D::new(v, v, v));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        if let Some(p) = slot.get() {
                            assert!(p.x == p.y && p.y == p.theta, "torn read {p:?}");
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
