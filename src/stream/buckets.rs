//! Output bucket table
//!
//! Registered outputs live in a 2-D table: `buckets[bucket][slot]`. All
//! outputs in one bucket are served together; each successive bucket gets an
//! extra stagger delay, smoothing aggregate egress when hundreds of clients
//! watch the same source. The table grows by doubling the bucket count and
//! never shrinks, so a bucket index handed to a client stays valid for the
//! registration's lifetime.

use std::sync::Arc;

use crate::output::{BookmarkTable, ReflectorOutput};

/// Buckets allocated up front
const MIN_BUCKETS: usize = 2;

/// One registered output plus its saved scan positions
pub struct BucketEntry {
    /// The downstream client stream
    pub output: Arc<dyn ReflectorOutput>,
    /// Scan positions, one slot per sender direction
    pub bookmarks: BookmarkTable,
}

/// Growable 2-D table of registered outputs
pub struct BucketTable {
    buckets: Vec<Vec<Option<BucketEntry>>>,
    slots_per_bucket: usize,
    count: usize,
}

impl BucketTable {
    /// Create a table with the minimum bucket count
    pub fn new(slots_per_bucket: usize) -> Self {
        let slots = slots_per_bucket.max(1);
        Self {
            buckets: (0..MIN_BUCKETS).map(|_| empty_bucket(slots)).collect(),
            slots_per_bucket: slots,
            count: 0,
        }
    }

    /// Number of buckets currently allocated
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total slots across all buckets
    pub fn capacity(&self) -> usize {
        self.buckets.len() * self.slots_per_bucket
    }

    /// Registered output count
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Outputs currently playing (the live eye count)
    pub fn playing_count(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .flatten()
            .filter(|e| e.output.is_playing())
            .count()
    }

    /// Register an output
    ///
    /// With no preference, the first free slot wins (bucket-major order).
    /// A caller-specified bucket co-locates related registrations, growing
    /// the table as needed to reach it; `None` is returned only when that
    /// bucket is already full.
    pub fn insert(
        &mut self,
        output: Arc<dyn ReflectorOutput>,
        preferred_bucket: Option<usize>,
    ) -> Option<usize> {
        let entry = BucketEntry {
            output,
            bookmarks: BookmarkTable::new(),
        };

        if let Some(bucket) = preferred_bucket {
            while bucket >= self.buckets.len() {
                self.grow();
            }
            let slot = self.buckets[bucket].iter().position(Option::is_none)?;
            self.buckets[bucket][slot] = Some(entry);
            self.count += 1;
            return Some(bucket);
        }

        let found = self
            .buckets
            .iter()
            .position(|b| b.iter().any(Option::is_none));
        let bucket = match found {
            Some(b) => b,
            None => self.grow_from(),
        };
        let slot = self.buckets[bucket]
            .iter()
            .position(Option::is_none)
            .expect("bucket has a free slot");
        self.buckets[bucket][slot] = Some(entry);
        self.count += 1;
        Some(bucket)
    }

    /// Double the bucket count, preserving existing bucket indices
    ///
    /// Returns the new capacity.
    pub fn grow(&mut self) -> usize {
        let add = self.buckets.len();
        for _ in 0..add {
            self.buckets.push(empty_bucket(self.slots_per_bucket));
        }
        self.capacity()
    }

    fn grow_from(&mut self) -> usize {
        let first_new = self.buckets.len();
        self.grow();
        first_new
    }

    /// Unregister an output; returns whether it was present
    pub fn remove(&mut self, output: &Arc<dyn ReflectorOutput>) -> bool {
        for bucket in self.buckets.iter_mut() {
            for slot in bucket.iter_mut() {
                if matches!(slot, Some(e) if Arc::ptr_eq(&e.output, output)) {
                    *slot = None;
                    self.count -= 1;
                    return true;
                }
            }
        }
        false
    }

    /// Remove every output, handing each to the callback
    pub fn drain_all(&mut self, mut f: impl FnMut(Arc<dyn ReflectorOutput>)) {
        for bucket in self.buckets.iter_mut() {
            for slot in bucket.iter_mut() {
                if let Some(entry) = slot.take() {
                    self.count -= 1;
                    f(entry.output);
                }
            }
        }
    }

    /// Mutable view of one bucket's slots
    pub(crate) fn bucket_mut(&mut self, bucket: usize) -> &mut [Option<BucketEntry>] {
        &mut self.buckets[bucket]
    }

    /// Bucket index holding the given output, if registered
    pub fn bucket_of(&self, output: &Arc<dyn ReflectorOutput>) -> Option<usize> {
        self.buckets.iter().position(|b| {
            b.iter()
                .flatten()
                .any(|e| Arc::ptr_eq(&e.output, output))
        })
    }
}

fn empty_bucket(slots: usize) -> Vec<Option<BucketEntry>> {
    (0..slots).map(|_| None).collect()
}

impl std::fmt::Debug for BucketTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTable")
            .field("buckets", &self.buckets.len())
            .field("slots_per_bucket", &self.slots_per_bucket)
            .field("count", &self.count)
            .finish()
    }
}
