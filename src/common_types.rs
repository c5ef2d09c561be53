//! Types shared between the extraction, reindexing and caching stages.
use serde_derive::Serialize;

/// at which time (in nanoseconds) does the event happen
pub type TimeStamp = u64;
/// index of a frame in the profiler's capture
pub type FrameIndex = u64;
/// identifier of a named profiling marker
pub type MarkerId = u32;
/// index into the category colors table
pub type CategoryId = u16;
/// nesting depth of a sample inside its thread
pub type Level = u32;
/// position of an event inside a frame's events array
pub type EventIndex = usize;
/// position of a thread inside a frame's threads array
pub type ThreadIndex = usize;
/// rgba color
pub type Color = [f32; 4];

/// A job instance. The generation guards against index reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct JobHandle {
    /// slot of the job in the scheduler
    pub index: u32,
    /// reuse counter of the slot
    pub generation: u32,
}

impl JobHandle {
    /// Absent handle.
    pub const INVALID: JobHandle = JobHandle {
        index: 0,
        generation: 0,
    };

    /// Create a new handle.
    pub fn new(index: u32, generation: u32) -> Self {
        JobHandle { index, generation }
    }

    /// A handle is only usable when neither field is zero.
    pub fn is_valid(&self) -> bool {
        self.index != 0 && self.generation != 0
    }

    /// Pack into a single integer (for map keys).
    pub fn pack(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of `pack`.
    pub fn unpack(packed: u64) -> Self {
        JobHandle {
            index: packed as u32,
            generation: (packed >> 32) as u32,
        }
    }
}

/// One profiled span, as stored in the flat events array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Event {
    /// starting time (in ns)
    pub start_time: TimeStamp,
    /// how long it ran (in ns)
    pub duration: TimeStamp,
    /// thread who ran us
    pub thread_index: ThreadIndex,
    /// nesting depth
    pub level: Level,
    /// index in the category colors table
    pub category_id: CategoryId,
    /// marker used to look our name up
    pub marker_id: MarkerId,
    /// enclosing event, `None` for roots
    pub parent_index: Option<EventIndex>,
}

impl Event {
    /// Return ending time.
    pub fn end_time(&self) -> TimeStamp {
        self.start_time + self.duration
    }
}

/// A job scheduling as recorded by the job system.
/// Dependencies are not owned but stored as a slice of the frame's dependency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledJobInfo {
    /// scheduled job
    pub handle: JobHandle,
    /// number of iterations (parallel-for jobs)
    pub count: u32,
    /// iterations per batch
    pub grain_size: u32,
    /// event of the scheduling sample
    pub event_index: EventIndex,
    /// how many valid dependencies we have
    pub dependency_count: usize,
    /// where they start in the dependency table
    pub dependency_table_index: usize,
}

/// Lifecycle transitions we can observe for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobFlowState {
    /// job got scheduled
    BeginSchedule,
    /// someone blocked until the job finished
    WaitedOn,
    /// job completed and nobody had to wait
    CompletedNoWait,
}

/// One observed lifecycle transition of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobFlow {
    /// job concerned
    pub handle: JobHandle,
    /// event where the transition happened
    pub event_index: EventIndex,
    /// kind of transition
    pub state: JobFlowState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packing() {
        let handle = JobHandle::new(7, 0xdead_beef);
        assert_eq!(JobHandle::unpack(handle.pack()), handle);
        assert_ne!(JobHandle::new(1, 2).pack(), JobHandle::new(2, 1).pack());
        assert_eq!(JobHandle::INVALID.pack(), 0);
    }

    #[test]
    fn handle_validity() {
        assert!(JobHandle::new(3, 1).is_valid());
        assert!(!JobHandle::new(0, 1).is_valid());
        assert!(!JobHandle::new(3, 0).is_valid());
        assert!(!JobHandle::INVALID.is_valid());
    }
}
