// ── Device directory reconciliation ──
//
// Every snapshot from the server is the whole directory. The reconciler
// keeps the previous one and reports only what moved.

use crate::model::{DeviceDirectory, DeviceUpdate, DirectoryDiff};

/// Turns successive full snapshots into add/update/remove events.
#[derive(Debug, Default)]
pub struct DirectoryReconciler {
    previous: DeviceDirectory,
    received: bool,
}

impl DirectoryReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last applied snapshot.
    pub fn current(&self) -> &DeviceDirectory {
        &self.previous
    }

    /// `false` until the first snapshot has been applied.
    pub fn has_snapshot(&self) -> bool {
        self.received
    }

    /// Diff `next` against the retained snapshot, then retain `next`.
    pub fn reconcile(&mut self, next: DeviceDirectory) -> DirectoryDiff {
        let out = diff(&self.previous, &next);
        self.previous = next;
        self.received = true;
        out
    }
}

/// Minimal diff between two snapshots, each list sorted by id.
pub fn diff(previous: &DeviceDirectory, next: &DeviceDirectory) -> DirectoryDiff {
    let mut out = DirectoryDiff::default();

    for (id, record) in next {
        match previous.get(id) {
            None => out.added.push(record.clone()),
            Some(old) => {
                let changed_fields = old.changed_fields(record);
                if !changed_fields.is_empty() {
                    out.updated.push(DeviceUpdate {
                        id: id.clone(),
                        changed_fields,
                        record: record.clone(),
                    });
                }
            }
        }
    }
    out.removed = previous
        .keys()
        .filter(|id| !next.contains_key(*id))
        .cloned()
        .collect();

    out
}
