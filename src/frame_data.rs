//! Provide the structure holding all processed information for one frame.
use crate::common_types::{
    Color, Event, EventIndex, FrameIndex, JobFlow, JobHandle, Level, MarkerId, ScheduledJobInfo,
    ThreadIndex, TimeStamp,
};
use crate::strings::NameTables;
use serde_derive::Serialize;
use std::collections::HashMap;
use std::io;
use std::iter::successors;
use std::ops::Range;

/// Everything we know about one thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    /// thread name
    pub name: String,
    /// system thread id
    pub id: u64,
    /// group we were sorted into
    pub group: String,
    /// reported nesting depth
    pub max_depth: u32,
    /// our part of the events array
    pub events: Range<EventIndex>,
    /// events of each level (only filled after reindexing)
    pub levels: Vec<Range<EventIndex>>,
}

/// Consecutive threads sharing a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadGroup {
    /// group name
    pub name: String,
    /// our part of the threads array
    pub threads: Range<ThreadIndex>,
    /// hash of all thread names, for cheap comparisons between frames
    pub names_hash: u64,
}

/// The final information produced for one frame.
///
/// Events are grouped by thread. Inside a thread they are grouped by level
/// (level 0 first) and inside a level sorted from left to right.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameData {
    /// frame number
    pub index: FrameIndex,
    /// starting time (in ns)
    pub start_time: TimeStamp,
    /// duration (in ns)
    pub duration: TimeStamp,
    /// all events of all threads
    pub events: Vec<Event>,
    /// colors of categories (indexed by category id)
    pub category_colors: Vec<Color>,
    /// all threads sorted by group and name
    pub threads: Vec<ThreadInfo>,
    /// groups of threads
    pub thread_groups: Vec<ThreadGroup>,
    /// system thread id to position in `threads`
    pub thread_ids: HashMap<u64, ThreadIndex>,
    /// marker names
    pub names: NameTables,
    /// all jobs scheduled during the frame
    pub scheduled_jobs: Vec<ScheduledJobInfo>,
    /// dependencies of all scheduled jobs, sliced by each `ScheduledJobInfo`
    pub dependency_table: Vec<JobHandle>,
    /// all observed job transitions
    pub job_flows: Vec<JobFlow>,
    /// which event executed which job
    pub job_events: Vec<(JobHandle, EventIndex)>,
    #[serde(skip)]
    pub(crate) event_to_handle: HashMap<EventIndex, JobHandle>,
    #[serde(skip)]
    pub(crate) handle_to_event: HashMap<u64, EventIndex>,
}

impl FrameData {
    /// Create an empty frame data with room for given number of samples.
    pub fn with_capacity(index: FrameIndex, samples: usize) -> Self {
        FrameData {
            index,
            events: Vec::with_capacity(samples),
            ..Default::default()
        }
    }

    /// Name of given marker.
    pub fn marker_name(&self, marker_id: MarkerId) -> Option<&str> {
        self.names.marker_name(marker_id)
    }

    /// Name of given event.
    pub fn event_name(&self, event: EventIndex) -> Option<&str> {
        self.events
            .get(event)
            .and_then(|e| self.names.marker_name(e.marker_id))
    }

    /// Job executed by given event.
    pub fn event_job_handle(&self, event: EventIndex) -> Option<JobHandle> {
        self.event_to_handle.get(&event).cloned()
    }

    /// Event executing given job.
    pub fn event_for_handle(&self, handle: JobHandle) -> Option<EventIndex> {
        self.handle_to_event.get(&handle.pack()).cloned()
    }

    /// Duration of given event.
    pub fn event_duration(&self, event: EventIndex) -> Option<TimeStamp> {
        self.events.get(event).map(|e| e.duration)
    }

    /// Jobs given scheduled job depends on.
    pub fn dependencies(&self, job: &ScheduledJobInfo) -> &[JobHandle] {
        &self.dependency_table
            [job.dependency_table_index..job.dependency_table_index + job.dependency_count]
    }

    /// Scheduling information of given job.
    pub fn scheduled_job(&self, handle: JobHandle) -> Option<&ScheduledJobInfo> {
        self.scheduled_jobs.iter().find(|job| job.handle == handle)
    }

    /// All transitions of given job, in recording order.
    pub fn flows(&self, handle: JobHandle) -> impl Iterator<Item = &JobFlow> + '_ {
        self.job_flows.iter().filter(move |f| f.handle == handle)
    }

    /// All events of given thread at given level.
    pub fn events_at_level(&self, thread: ThreadIndex, level: Level) -> &[Event] {
        self.threads
            .get(thread)
            .and_then(|t| t.levels.get(level as usize))
            .map(|range| &self.events[range.clone()])
            .unwrap_or(&[])
    }

    /// Enclosing events of given event, innermost first.
    pub fn ancestors(&self, event: EventIndex) -> impl Iterator<Item = EventIndex> + '_ {
        successors(
            self.events.get(event).and_then(|e| e.parent_index),
            move |&parent| self.events[parent].parent_index,
        )
    }

    /// Thread with given system id.
    pub fn thread_by_id(&self, id: u64) -> Option<&ThreadInfo> {
        self.thread_ids.get(&id).map(|&index| &self.threads[index])
    }

    /// Ending time of the frame.
    pub fn end_time(&self) -> TimeStamp {
        self.start_time + self.duration
    }

    /// Dump everything as json (for debugging).
    pub fn write_json<W: io::Write>(&self, destination: W) -> serde_json::Result<()> {
        serde_json::to_writer(destination, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: Level, parent_index: Option<EventIndex>) -> Event {
        Event {
            start_time: 0,
            duration: 10,
            thread_index: 0,
            level,
            category_id: 0,
            marker_id: level,
            parent_index,
        }
    }

    fn small_frame() -> FrameData {
        let mut frame = FrameData::with_capacity(1, 3);
        frame.events = vec![event(0, None), event(1, Some(0)), event(2, Some(1))];
        frame.threads.push(ThreadInfo {
            name: "Main Thread".to_string(),
            id: 42,
            group: "Main Thread".to_string(),
            max_depth: 3,
            events: 0..3,
            levels: vec![0..1, 1..2, 2..3],
        });
        frame.thread_ids.insert(42, 0);
        frame
    }

    #[test]
    fn ancestors_walk_up() {
        let frame = small_frame();
        assert_eq!(frame.ancestors(2).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(frame.ancestors(0).count(), 0);
        assert_eq!(frame.ancestors(17).count(), 0);
    }

    #[test]
    fn levels_and_threads() {
        let frame = small_frame();
        assert_eq!(frame.events_at_level(0, 1), &frame.events[1..2]);
        assert!(frame.events_at_level(0, 3).is_empty());
        assert!(frame.events_at_level(1, 0).is_empty());
        assert_eq!(frame.thread_by_id(42).map(|t| t.max_depth), Some(3));
        assert!(frame.thread_by_id(43).is_none());
    }

    #[test]
    fn missing_events() {
        let frame = small_frame();
        assert_eq!(frame.event_duration(1), Some(10));
        assert_eq!(frame.event_duration(3), None);
        assert_eq!(frame.event_name(3), None);
        assert_eq!(frame.event_job_handle(0), None);
    }

    #[test]
    fn json_dump() {
        let mut output = Vec::new();
        small_frame().write_json(&mut output).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["threads"][0]["name"], "Main Thread");
        assert_eq!(value["events"].as_array().map(Vec::len), Some(3));
    }
}
