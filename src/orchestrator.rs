//! `CacheOrchestrator` decides which frames to process and collects the results.
//!
//! It is polled once per caller tick and never blocks there: work is sent to
//! a rayon pool and results are picked up on later ticks.
//! The number of frames processed simultaneously is bounded by a fixed number
//! of slots, each slot holding one frame's pipeline and its raw snapshot.
use crate::common_types::{EventIndex, FrameIndex, JobHandle, MarkerId, TimeStamp};
use crate::config::ExtractorConfig;
use crate::frame_data::FrameData;
use crate::pipeline::{Pipeline, PipelineStatus};
use crate::raw_frame::{FrameSource, RawFrame};
use log::{debug, error, trace};
use std::collections::{BTreeMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Is there work going on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// nothing requested
    Idle,
    /// a range is being cached
    Caching,
}

/// An inclusive range of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    /// first frame
    pub first: FrameIndex,
    /// last frame (included)
    pub last: FrameIndex,
}

impl FrameRange {
    /// Create a new range, in whatever order the bounds come.
    pub fn new(a: FrameIndex, b: FrameIndex) -> Self {
        FrameRange {
            first: a.min(b),
            last: a.max(b),
        }
    }

    /// All frames in the range.
    pub fn frames(&self) -> RangeInclusive<FrameIndex> {
        self.first..=self.last
    }

    /// Number of frames. The full `u64` range has 2^64 of them.
    pub fn len(&self) -> u128 {
        u128::from(self.last - self.first) + 1
    }

    /// A range is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// One frame in flight.
struct Slot {
    frame: FrameIndex,
    /// keeps the raw data alive until we finalize
    source: Arc<RawFrame>,
    pipeline: Pipeline,
}

/// Turn a frame index into a well spread integer (splitmix64 finalizer).
fn mix(frame: FrameIndex) -> u64 {
    let mut z = frame.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Caches processed frames, processing requested ranges in the background.
pub struct CacheOrchestrator {
    source: Arc<dyn FrameSource>,
    pool: Arc<rayon::ThreadPool>,
    config: Arc<ExtractorConfig>,
    slots: Vec<Slot>,
    slot_capacity: usize,
    /// frames of the active range we look at per call, at most
    probe_budget: usize,
    committed: BTreeMap<FrameIndex, FrameData>,
    fingerprint: u64,
    state: CacheState,
    active: Option<FrameRange>,
    /// next frame of the active range to look at
    next_frame: Option<FrameIndex>,
    pending: VecDeque<FrameRange>,
}

impl CacheOrchestrator {
    pub(crate) fn new(
        source: Arc<dyn FrameSource>,
        pool: Arc<rayon::ThreadPool>,
        config: ExtractorConfig,
        slot_capacity: usize,
        probe_budget: usize,
    ) -> Self {
        CacheOrchestrator {
            source,
            pool,
            config: Arc::new(config),
            slots: Vec::with_capacity(slot_capacity),
            slot_capacity,
            probe_budget,
            committed: BTreeMap::new(),
            fingerprint: 0,
            state: CacheState::Idle,
            active: None,
            next_frame: None,
            pending: VecDeque::new(),
        }
    }

    /// Ask for all frames between `first` and `last` (included) to be cached.
    ///
    /// Nothing happens if the range is the one being cached, is already waiting
    /// or if all its frames are cached. While caching, the range is queued.
    pub fn request_range(&mut self, first: FrameIndex, last: FrameIndex) {
        let range = FrameRange::new(first, last);
        if self.active == Some(range) || self.pending.contains(&range) || self.is_cached(range) {
            trace!("range {:?} already handled", range);
            return;
        }
        match self.state {
            CacheState::Caching => {
                debug!("queuing range {:?}", range);
                self.pending.push_back(range);
            }
            CacheState::Idle => {
                self.activate(range);
                self.schedule();
            }
        }
    }

    /// Collect finished frames and start new ones. Never blocks.
    pub fn tick(&mut self) {
        self.finalize_finished();
        self.schedule();
        // the active range is done once every frame was looked at and committed
        if self.slots.is_empty() && self.next_frame.is_none() && self.state == CacheState::Caching
        {
            self.advance();
        }
    }

    /// Block until all frames in flight are processed and commit them.
    /// Does not start new work.
    pub fn flush(&mut self) {
        for slot in std::mem::take(&mut self.slots) {
            let result = slot.pipeline.wait();
            self.finalize(slot, result);
        }
    }

    /// Drop everything: frames in flight (after waiting for them), cached
    /// frames and requested ranges.
    pub fn clear(&mut self) {
        let in_flight = self.slots.len();
        self.flush();
        debug!(
            "clearing {} cached frames ({} were in flight)",
            self.committed.len(),
            in_flight
        );
        self.committed.clear();
        self.fingerprint = 0;
        self.pending.clear();
        self.active = None;
        self.next_frame = None;
        self.state = CacheState::Idle;
    }

    fn is_cached(&self, range: FrameRange) -> bool {
        self.committed.range(range.frames()).count() as u128 == range.len()
    }

    fn activate(&mut self, range: FrameRange) {
        debug!("caching range {:?}", range);
        self.state = CacheState::Caching;
        self.active = Some(range);
        self.next_frame = Some(range.first);
    }

    /// Move to next requested range if any.
    fn advance(&mut self) {
        match self.pending.pop_front() {
            Some(range) => self.activate(range),
            None => {
                debug!("caching done, {} frames cached", self.committed.len());
                self.state = CacheState::Idle;
                self.active = None;
                self.next_frame = None;
            }
        }
    }

    /// Release slots whose pipelines completed.
    fn finalize_finished(&mut self) {
        let mut index = 0;
        while index < self.slots.len() {
            let result = match self.slots[index].pipeline.poll() {
                PipelineStatus::Running => {
                    index += 1;
                    continue;
                }
                PipelineStatus::Finished(frame) => Some(frame),
                PipelineStatus::Failed => None,
            };
            let slot = self.slots.swap_remove(index);
            self.finalize(slot, result);
        }
    }

    /// Release a slot, committing its frame if processing went well.
    fn finalize(&mut self, slot: Slot, result: Option<FrameData>) {
        trace!(
            "frame {}: releasing {} raw samples",
            slot.frame,
            slot.source.sample_count()
        );
        match result {
            Some(frame) => self.commit(slot.frame, frame),
            None => error!("processing frame {} failed", slot.frame),
        }
    }

    fn commit(&mut self, index: FrameIndex, frame: FrameData) {
        trace!("frame {}: committing {} events", index, frame.events.len());
        if self.committed.insert(index, frame).is_none() {
            self.fingerprint ^= mix(index);
        }
    }

    /// Fill free slots with frames of the active range.
    /// Looks at no more than `probe_budget` frames, the rest waits for next ticks.
    fn schedule(&mut self) {
        let range = match self.active {
            Some(range) => range,
            None => return,
        };
        let mut probed = 0;
        while self.slots.len() < self.slot_capacity && probed < self.probe_budget {
            let frame = match self.next_frame {
                Some(frame) => frame,
                None => break,
            };
            probed += 1;
            self.next_frame = frame.checked_add(1).filter(|next| *next <= range.last);
            if self.committed.contains_key(&frame) || self.slots.iter().any(|s| s.frame == frame) {
                continue;
            }
            let samples = self.source.sample_count(frame);
            if samples == 0 {
                trace!("frame {} has no samples", frame);
                continue;
            }
            let snapshot = match self.source.snapshot(frame) {
                Some(snapshot) => snapshot,
                None => continue,
            };
            debug!("frame {}: scheduling {} samples", frame, samples);
            let pipeline = Pipeline::spawn(
                &self.pool,
                snapshot.clone(),
                FrameData::with_capacity(frame, samples),
                frame,
                self.config.clone(),
            );
            self.slots.push(Slot {
                frame,
                source: snapshot,
                pipeline,
            });
        }
    }

    /// Processed frame, if cached.
    pub fn frame(&self, frame: FrameIndex) -> Option<&FrameData> {
        self.committed.get(&frame)
    }

    /// Name of a marker in a cached frame.
    pub fn marker_name(&self, frame: FrameIndex, marker_id: MarkerId) -> Option<&str> {
        self.frame(frame).and_then(|f| f.marker_name(marker_id))
    }

    /// Name of an event in a cached frame.
    pub fn event_name(&self, frame: FrameIndex, event: EventIndex) -> Option<&str> {
        self.frame(frame).and_then(|f| f.event_name(event))
    }

    /// Job executed by an event in a cached frame.
    pub fn event_job_handle(&self, frame: FrameIndex, event: EventIndex) -> Option<JobHandle> {
        self.frame(frame).and_then(|f| f.event_job_handle(event))
    }

    /// Duration of an event in a cached frame.
    pub fn event_duration(&self, frame: FrameIndex, event: EventIndex) -> Option<TimeStamp> {
        self.frame(frame).and_then(|f| f.event_duration(event))
    }

    /// Summary of the set of cached frames. Changes whenever a frame is added or removed.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Current state.
    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Number of frames being processed.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Maximal number of frames processed simultaneously.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Range being cached.
    pub fn active_range(&self) -> Option<FrameRange> {
        self.active
    }

    /// Ranges waiting for the active one to complete.
    pub fn pending_ranges(&self) -> impl Iterator<Item = &FrameRange> + '_ {
        self.pending.iter()
    }

    /// Indices of all cached frames, in increasing order.
    pub fn committed_frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.committed.keys().cloned()
    }

    /// Settings used for extraction.
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }
}

impl Drop for CacheOrchestrator {
    fn drop(&mut self) {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CacheOrchestratorBuilder;
    use crate::raw_frame::{InMemorySource, RawSample, RawThread};
    use std::collections::HashSet;

    fn source(frames: &[FrameIndex]) -> Arc<InMemorySource> {
        let source = InMemorySource::new();
        for &index in frames {
            source.insert(RawFrame {
                index,
                threads: vec![RawThread::new("Main Thread", 1, "")
                    .samples(vec![RawSample::new("root", 1, 0, 10)])],
                ..Default::default()
            });
        }
        Arc::new(source)
    }

    fn orchestrator(frames: &[FrameIndex], slots: usize) -> CacheOrchestrator {
        CacheOrchestratorBuilder::new()
            .num_threads(2)
            .max_in_flight(slots)
            .build(source(frames))
            .unwrap()
    }

    #[test]
    fn ranges_are_normalized() {
        let range = FrameRange::new(7, 3);
        assert_eq!(range.frames(), 3..=7);
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn fingerprint_ignores_order() {
        let mut a = orchestrator(&[], 1);
        let mut b = orchestrator(&[], 1);
        a.commit(1, FrameData::default());
        a.commit(2, FrameData::default());
        b.commit(2, FrameData::default());
        b.commit(1, FrameData::default());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), 0);
        b.commit(3, FrameData::default());
        assert_ne!(a.fingerprint(), b.fingerprint());
        a.clear();
        assert_eq!(a.fingerprint(), 0);
    }

    #[test]
    fn slots_are_bounded() {
        let mut cache = orchestrator(&[0, 1, 2, 3, 4], 2);
        cache.request_range(0, 4);
        assert_eq!(cache.in_flight(), 2);
        let mut seen = HashSet::new();
        while cache.state() == CacheState::Caching {
            assert!(cache.in_flight() <= 2);
            cache.slots.iter().for_each(|s| {
                seen.insert(s.frame);
            });
            cache.flush();
            cache.tick();
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(cache.committed_frames().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn snapshots_are_released() {
        let frames = source(&[0]);
        let mut cache = CacheOrchestratorBuilder::new()
            .num_threads(1)
            .build(frames.clone())
            .unwrap();
        cache.request_range(0, 0);
        cache.flush();
        assert!(cache.frame(0).is_some());
        // one in the source, one here
        assert_eq!(Arc::strong_count(&frames.snapshot(0).unwrap()), 2);
    }

    #[test]
    fn full_width_ranges() {
        assert_eq!(FrameRange::new(u64::MAX, 0).len(), 1u128 << 64);
        let mut cache = CacheOrchestratorBuilder::new()
            .num_threads(2)
            .max_in_flight(2)
            .probe_budget(16)
            .build(source(&[0, 5]))
            .unwrap();
        cache.request_range(0, 0);
        cache.flush();
        cache.tick();
        assert_eq!(cache.state(), CacheState::Idle);

        cache.request_range(0, u64::MAX);
        assert_eq!(cache.state(), CacheState::Caching);
        assert_eq!(cache.in_flight(), 1);
        assert_eq!(cache.next_frame, Some(16));
        cache.flush();
        cache.tick();
        assert!(cache.frame(5).is_some());
        // probing goes on, a few frames per tick
        assert_eq!(cache.next_frame, Some(32));
        assert_eq!(cache.state(), CacheState::Caching);
    }

    #[test]
    fn empty_frames_are_never_scheduled() {
        let mut cache = orchestrator(&[1], 4);
        cache.request_range(0, 2);
        assert_eq!(cache.in_flight(), 1);
        assert_eq!(cache.slots[0].frame, 1);
        cache.flush();
        cache.tick();
        assert_eq!(cache.state(), CacheState::Idle);
        assert!(cache.frame(0).is_none());
        assert!(cache.frame(2).is_none());
        assert!(cache.frame(1).is_some());
    }
}
