//! Raw unprocessed profiler data, as handed to us by the platform profiler.
//! Each thread is a list of samples stored in depth first pre-order,
//! each sample knowing how many direct children follow it.
use crate::common_types::{CategoryId, Color, FrameIndex, MarkerId, TimeStamp};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One profiler sample.
#[derive(Debug, Clone, Default)]
pub struct RawSample {
    /// marker name, if the profiler could resolve it
    pub name: Option<String>,
    /// marker identifier
    pub marker_id: MarkerId,
    /// category of the marker
    pub category: CategoryId,
    /// starting time (in ns)
    pub start_time: TimeStamp,
    /// duration (in ns)
    pub duration: TimeStamp,
    /// number of direct children following us
    pub children_count: usize,
    /// binary metadata blocks attached to the sample
    pub metadata: Vec<Vec<u8>>,
}

impl RawSample {
    /// Create a childless sample without metadata.
    pub fn new<S: Into<String>>(
        name: S,
        marker_id: MarkerId,
        start_time: TimeStamp,
        duration: TimeStamp,
    ) -> Self {
        RawSample {
            name: Some(name.into()),
            marker_id,
            start_time,
            duration,
            ..Default::default()
        }
    }

    /// Set the number of direct children.
    pub fn children(self, children_count: usize) -> Self {
        RawSample {
            children_count,
            ..self
        }
    }

    /// Set the category.
    pub fn category(self, category: CategoryId) -> Self {
        RawSample { category, ..self }
    }

    /// Attach a metadata block.
    pub fn metadata(mut self, block: Vec<u8>) -> Self {
        self.metadata.push(block);
        self
    }
}

/// All samples of one thread for one frame.
#[derive(Debug, Clone, Default)]
pub struct RawThread {
    /// thread name
    pub name: String,
    /// system thread id
    pub id: u64,
    /// thread group ("Job", "Loading", ...), empty if none
    pub group: String,
    /// deepest nesting seen by the profiler
    pub max_depth: u32,
    /// samples in pre-order
    pub samples: Vec<RawSample>,
}

impl RawThread {
    /// Create a thread without samples.
    pub fn new<N: Into<String>, G: Into<String>>(name: N, id: u64, group: G) -> Self {
        RawThread {
            name: name.into(),
            id,
            group: group.into(),
            max_depth: 0,
            samples: Vec::new(),
        }
    }

    /// Set the samples, recomputing the depth.
    pub fn samples(mut self, samples: Vec<RawSample>) -> Self {
        self.max_depth = tree_depth(&samples);
        self.samples = samples;
        self
    }
}

/// Depth of a pre-order list of samples.
fn tree_depth(samples: &[RawSample]) -> u32 {
    let mut remaining_children: Vec<usize> = Vec::new();
    let mut depth = 0;
    for sample in samples {
        if let Some(remaining) = remaining_children.last_mut() {
            *remaining -= 1;
        }
        if sample.children_count > 0 {
            remaining_children.push(sample.children_count);
        }
        depth = depth.max(remaining_children.len() as u32 + u32::from(sample.children_count == 0));
        while remaining_children.last() == Some(&0) {
            remaining_children.pop();
        }
    }
    depth
}

/// Category description.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// identifier (index in the colors table)
    pub id: CategoryId,
    /// display name
    pub name: String,
    /// display color
    pub color: Color,
}

/// Immutable snapshot of everything the profiler recorded for one frame.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// frame number
    pub index: FrameIndex,
    /// starting time (in ns)
    pub start_time: TimeStamp,
    /// duration (in ns)
    pub duration: TimeStamp,
    /// known categories
    pub categories: Vec<Category>,
    /// all threads, in profiler order
    pub threads: Vec<RawThread>,
}

impl RawFrame {
    /// Total number of samples in all threads.
    pub fn sample_count(&self) -> usize {
        self.threads.iter().map(|t| t.samples.len()).sum()
    }
}

/// Where frames come from.
///
/// Probing must be cheap: it is called on the caller's thread while
/// deciding what to cache. Snapshots are moved into worker tasks.
pub trait FrameSource: Send + Sync + 'static {
    /// Number of samples recorded for given frame (0 if unknown).
    fn sample_count(&self, frame: FrameIndex) -> usize;
    /// Snapshot of given frame.
    fn snapshot(&self, frame: FrameIndex) -> Option<Arc<RawFrame>>;
}

/// A `FrameSource` for captures already held in memory.
#[derive(Debug, Default)]
pub struct InMemorySource {
    frames: RwLock<HashMap<FrameIndex, Arc<RawFrame>>>,
}

impl InMemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        InMemorySource::default()
    }

    /// Add (or replace) a frame.
    pub fn insert(&self, frame: RawFrame) {
        self.frames
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(frame.index, Arc::new(frame));
    }
}

impl FrameSource for InMemorySource {
    fn sample_count(&self, frame: FrameIndex) -> usize {
        self.snapshot(frame).map_or(0, |f| f.sample_count())
    }

    fn snapshot(&self, frame: FrameIndex) -> Option<Arc<RawFrame>> {
        self.frames
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&frame)
            .cloned()
    }
}
