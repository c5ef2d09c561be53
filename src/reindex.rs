//! Second pipeline stage: group events by level.
//!
//! After extraction each thread's events are in traversal order. We move them
//! so that inside each thread all events of level 0 come first, then all events
//! of level 1 and so on; each level keeping its left to right order.
//! This is a counting sort on levels, run thread by thread, followed by a
//! rewrite of all indices pointing into the events array.
use crate::common_types::{Event, EventIndex};
use crate::config::MAX_LEVELS;
use crate::frame_data::FrameData;

/// Reorders a frame's events by level. Scratch buffers are kept between runs.
pub struct LevelReindexer {
    /// events per level, then running write position per level
    level_counts: Vec<usize>,
    /// old position to new position
    new_positions: Vec<EventIndex>,
    /// copy of the events before moving them
    snapshot: Vec<Event>,
}

impl Default for LevelReindexer {
    fn default() -> Self {
        LevelReindexer::new(MAX_LEVELS)
    }
}

impl LevelReindexer {
    /// Create a reindexer handling up to `max_levels` levels per thread.
    pub fn new(max_levels: usize) -> Self {
        LevelReindexer {
            level_counts: vec![0; max_levels],
            new_positions: Vec::new(),
            snapshot: Vec::new(),
        }
    }

    /// Maximal number of levels per thread we handle.
    pub fn max_levels(&self) -> usize {
        self.level_counts.len()
    }

    /// Reorder all events of given frame, updating all references to them,
    /// and build the event/handle lookup tables.
    pub fn reindex(&mut self, frame: &mut FrameData) {
        let events_number = frame.events.len();
        self.new_positions.clear();
        self.new_positions.resize(events_number, 0);

        for thread in &mut frame.threads {
            let start = thread.events.start;
            let events = &frame.events[thread.events.clone()];

            // count events per level
            let mut depth = 0;
            for event in events {
                let level = event.level as usize;
                assert!(
                    level < self.level_counts.len(),
                    "level {} exceeds maximal depth",
                    level
                );
                self.level_counts[level] += 1;
                depth = depth.max(level + 1);
            }

            // turn counts into starting positions
            thread.levels.clear();
            let mut offset = start;
            for count in &mut self.level_counts[..depth] {
                thread.levels.push(offset..offset + *count);
                let level_start = offset;
                offset += *count;
                *count = level_start;
            }

            // figure out where everyone goes
            for (old_position, event) in (start..).zip(events) {
                let next_position = &mut self.level_counts[event.level as usize];
                self.new_positions[old_position] = *next_position;
                *next_position += 1;
            }
            self.level_counts[..depth].iter_mut().for_each(|c| *c = 0);
        }

        let new_positions = &self.new_positions;
        for job in &mut frame.scheduled_jobs {
            job.event_index = new_positions[job.event_index];
        }
        for flow in &mut frame.job_flows {
            flow.event_index = new_positions[flow.event_index];
        }
        for (_, event_index) in &mut frame.job_events {
            *event_index = new_positions[*event_index];
        }
        for event in &mut frame.events {
            event.parent_index = event.parent_index.map(|parent| new_positions[parent]);
        }

        // moving in place would read overwritten events
        self.snapshot.clear();
        self.snapshot.extend_from_slice(&frame.events);
        for (old_position, event) in self.snapshot.iter().enumerate() {
            frame.events[new_positions[old_position]] = *event;
        }
        debug_assert!(frame.events.iter().all(|e| e
            .parent_index
            .map_or(e.level == 0, |p| frame.events[p].level + 1 == e.level)));

        frame.event_to_handle = frame
            .job_events
            .iter()
            .map(|&(handle, event)| (event, handle))
            .collect();
        frame.handle_to_event = frame
            .job_events
            .iter()
            .map(|&(handle, event)| (handle.pack(), event))
            .collect();
    }
}
