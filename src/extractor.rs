//! First pipeline stage: turn raw samples into flat events and job records.
use crate::common_types::{
    CategoryId, Event, EventIndex, FrameIndex, JobFlow, JobFlowState, JobHandle, Level, MarkerId,
    ScheduledJobInfo, ThreadIndex, TimeStamp,
};
use crate::config::ExtractorConfig;
use crate::frame_data::{FrameData, ThreadGroup, ThreadInfo};
use crate::metadata::JobMetadata;
use crate::raw_frame::{RawFrame, RawSample, RawThread};
use crate::strings::NameTables;
use itertools::Itertools;
use log::{debug, trace, warn};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const MAIN_THREAD: &str = "Main Thread";
const RENDER_THREAD: &str = "Render Thread";

/// What a sample's metadata tells us about job spans.
/// It is also the state of the extraction between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanState {
    /// plain sample
    Default,
    /// a job starts: the next sample is its execution
    PendingBegin,
    /// the most recent open job ends here
    PendingEnd,
}

/// A job whose execution started but is not attached to any event yet.
#[derive(Debug, Clone, Copy)]
struct OpenJob {
    handle: JobHandle,
    start_time: TimeStamp,
    marker_id: MarkerId,
    category_id: CategoryId,
}

/// What to emit for a sample.
#[derive(Debug)]
enum Emission {
    Nothing,
    Plain,
    /// the sample itself, executing given job
    Tagged(JobHandle),
    /// a synthetic event covering the whole job
    Span(OpenJob),
}

/// Pairs job begin markers with the events executing them.
/// Jobs can schedule jobs so we need a stack.
#[derive(Debug)]
struct JobSpans {
    state: SpanState,
    open: Vec<OpenJob>,
}

impl JobSpans {
    fn new() -> Self {
        JobSpans {
            state: SpanState::Default,
            open: Vec::new(),
        }
    }

    fn begin(&mut self, job: OpenJob) {
        self.open.push(job);
    }

    /// Advance the state machine with a sample decoding to `decoded`.
    fn step(&mut self, decoded: SpanState) -> Emission {
        let emission = match (self.state, decoded) {
            (_, SpanState::PendingBegin) => Emission::Nothing,
            (_, SpanState::PendingEnd) => self.open.pop().map_or(Emission::Nothing, Emission::Span),
            (SpanState::PendingBegin, SpanState::Default) => self
                .open
                .pop()
                .map_or(Emission::Plain, |job| Emission::Tagged(job.handle)),
            (_, SpanState::Default) => Emission::Plain,
        };
        self.state = match decoded {
            SpanState::PendingBegin => SpanState::PendingBegin,
            _ => SpanState::Default,
        };
        emission
    }

    /// Forget everything (thread boundary).
    fn reset(&mut self) {
        if !self.open.is_empty() {
            debug!("{} job spans never closed", self.open.len());
        }
        self.open.clear();
        self.state = SpanState::Default;
    }
}

/// A sample whose children are still being visited.
struct OpenSample {
    remaining_children: usize,
    children_level: Level,
    children_parent: Option<EventIndex>,
}

/// Fills a `FrameData` from a raw frame in one pass.
/// Events are produced in traversal order, grouped by thread.
pub struct EventExtractor<'a> {
    config: &'a ExtractorConfig,
    frame: &'a mut FrameData,
    spans: JobSpans,
    too_deep: usize,
}

impl<'a> EventExtractor<'a> {
    /// Create an extractor writing into given frame data.
    pub fn new(config: &'a ExtractorConfig, frame: &'a mut FrameData) -> Self {
        EventExtractor {
            config,
            frame,
            spans: JobSpans::new(),
            too_deep: 0,
        }
    }

    /// Process all threads of given frame.
    pub fn extract(mut self, raw: &RawFrame, index: FrameIndex) {
        self.frame.index = index;
        self.frame.start_time = raw.start_time;
        self.frame.duration = raw.duration;
        self.frame.names = NameTables::new(self.config.name_length_threshold);
        self.fill_category_colors(raw);

        for (thread_index, raw_thread) in sorted_threads(raw).into_iter().enumerate() {
            self.extract_thread(thread_index, raw_thread);
        }
        self.frame.thread_groups = group_threads(&self.frame.threads);

        if self.too_deep > 0 {
            warn!(
                "frame {}: dropped {} samples deeper than {} levels",
                index, self.too_deep, self.config.max_levels
            );
        }
        trace!(
            "frame {}: {} events, {} scheduled jobs, {} flows",
            index,
            self.frame.events.len(),
            self.frame.scheduled_jobs.len(),
            self.frame.job_flows.len()
        );
    }

    fn fill_category_colors(&mut self, raw: &RawFrame) {
        let size = raw
            .categories
            .iter()
            .map(|c| c.id as usize + 1)
            .max()
            .unwrap_or(0);
        let mut colors = vec![self.config.fallback_color; size];
        for category in &raw.categories {
            colors[category.id as usize] = category.color;
        }
        self.frame.category_colors = colors;
    }

    fn extract_thread(&mut self, thread_index: ThreadIndex, raw_thread: &RawThread) {
        self.spans.reset();
        let first_event = self.frame.events.len();
        let mut open_samples: Vec<OpenSample> = Vec::new();

        for sample in &raw_thread.samples {
            let (level, parent) = open_samples
                .last()
                .map_or((0, None), |s| (s.children_level, s.children_parent));
            if let Some(open) = open_samples.last_mut() {
                open.remaining_children -= 1;
            }
            let emitted = self.process(sample, thread_index, level, parent);
            if sample.children_count > 0 {
                // unemitted samples hand their children to their own parent
                open_samples.push(OpenSample {
                    remaining_children: sample.children_count,
                    children_level: if emitted.is_some() { level + 1 } else { level },
                    children_parent: emitted.or(parent),
                });
            }
            while open_samples
                .last()
                .map_or(false, |s| s.remaining_children == 0)
            {
                open_samples.pop();
            }
        }

        // a nameless first sample is a broken root: all levels moved up by one
        let broken_root = raw_thread
            .samples
            .first()
            .map_or(false, |s| s.name.is_none());
        let max_depth = if broken_root {
            raw_thread.max_depth.saturating_sub(1).max(1)
        } else {
            raw_thread.max_depth
        };

        self.frame
            .thread_ids
            .insert(raw_thread.id, self.frame.threads.len());
        self.frame.threads.push(ThreadInfo {
            name: raw_thread.name.clone(),
            id: raw_thread.id,
            group: thread_group(raw_thread).to_string(),
            max_depth,
            events: first_event..self.frame.events.len(),
            levels: Vec::new(),
        });
    }

    /// Handle one sample, returning the index of the emitted event if any.
    fn process(
        &mut self,
        sample: &RawSample,
        thread_index: ThreadIndex,
        level: Level,
        parent: Option<EventIndex>,
    ) -> Option<EventIndex> {
        if level as usize >= self.config.max_levels {
            self.too_deep += 1;
            return None;
        }
        self.frame
            .names
            .intern(sample.marker_id, sample.name.as_deref())?;

        let decoded = match self.decode(sample) {
            None => SpanState::Default,
            Some(JobMetadata::Schedule {
                handle,
                count,
                grain_size,
                dependencies,
                ..
            }) => {
                // schedule samples are always emitted, right now
                let event_index = self.frame.events.len();
                self.frame.scheduled_jobs.push(ScheduledJobInfo {
                    handle,
                    count,
                    grain_size,
                    event_index,
                    dependency_count: dependencies.len(),
                    dependency_table_index: self.frame.dependency_table.len(),
                });
                self.frame.dependency_table.extend(dependencies);
                self.frame.job_flows.push(JobFlow {
                    handle,
                    event_index,
                    state: JobFlowState::BeginSchedule,
                });
                SpanState::Default
            }
            Some(JobMetadata::Wait(handle, state)) => {
                self.frame.job_flows.push(JobFlow {
                    handle,
                    event_index: self.frame.events.len(),
                    state,
                });
                SpanState::Default
            }
            Some(JobMetadata::Begin(handle)) => {
                self.spans.begin(OpenJob {
                    handle,
                    start_time: sample.start_time,
                    marker_id: sample.marker_id,
                    category_id: sample.category,
                });
                SpanState::PendingBegin
            }
            Some(JobMetadata::End) => SpanState::PendingEnd,
        };

        let event = Event {
            start_time: sample.start_time,
            duration: sample.duration,
            thread_index,
            level,
            category_id: sample.category,
            marker_id: sample.marker_id,
            parent_index: parent,
        };
        match self.spans.step(decoded) {
            Emission::Nothing => None,
            Emission::Plain => Some(self.emit(event)),
            Emission::Tagged(handle) => {
                let event_index = self.emit(event);
                self.frame.job_events.push((handle, event_index));
                Some(event_index)
            }
            Emission::Span(job) => {
                let event_index = self.emit(Event {
                    start_time: job.start_time,
                    duration: sample.start_time.saturating_sub(job.start_time),
                    category_id: job.category_id,
                    marker_id: job.marker_id,
                    ..event
                });
                self.frame.job_events.push((job.handle, event_index));
                Some(event_index)
            }
        }
    }

    /// Decode the sample's metadata if it has exactly one block we understand.
    fn decode(&self, sample: &RawSample) -> Option<JobMetadata> {
        match sample.metadata.as_slice() {
            [block] => JobMetadata::decode(block)
                .map_err(|e| trace!("marker {}: ignoring metadata ({})", sample.marker_id, e))
                .ok(),
            _ => None,
        }
    }

    fn emit(&mut self, event: Event) -> EventIndex {
        self.frame.events.push(event);
        self.frame.events.len() - 1
    }
}

/// Group of a thread. Main and render threads are alone in their own group.
fn thread_group(thread: &RawThread) -> &str {
    if thread.group.is_empty() && (thread.name == MAIN_THREAD || thread.name == RENDER_THREAD) {
        &thread.name
    } else {
        &thread.group
    }
}

/// Threads sorted by group then name, naturally. Groups end up contiguous.
fn sorted_threads(raw: &RawFrame) -> Vec<&RawThread> {
    raw.threads
        .iter()
        .sorted_by(|a, b| {
            natural_cmp(thread_group(a), thread_group(b))
                .then_with(|| natural_cmp(&a.name, &b.name))
        })
        .collect()
}

/// Figure out the ranges of consecutive threads sharing a group.
fn group_threads(threads: &[ThreadInfo]) -> Vec<ThreadGroup> {
    let mut groups: Vec<ThreadGroup> = Vec::new();
    for (index, thread) in threads.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if group.name == thread.group => group.threads.end = index + 1,
            _ => groups.push(ThreadGroup {
                name: thread.group.clone(),
                threads: index..index + 1,
                names_hash: 0,
            }),
        }
    }
    for group in &mut groups {
        let mut hasher = DefaultHasher::new();
        threads[group.threads.clone()]
            .iter()
            .for_each(|t| t.name.hash(&mut hasher));
        group.names_hash = hasher.finish();
    }
    groups
}

fn split_digits(s: &str) -> (&str, &str) {
    s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()))
}

/// Compare strings, digits sequences being compared by value ("Worker 2" < "Worker 10").
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (digits_a, rest_a) = split_digits(a);
                let (digits_b, rest_b) = split_digits(b);
                let (value_a, value_b) = (
                    digits_a.trim_start_matches('0'),
                    digits_b.trim_start_matches('0'),
                );
                let order = value_a
                    .len()
                    .cmp(&value_b.len())
                    .then_with(|| value_a.cmp(value_b))
                    .then_with(|| digits_a.len().cmp(&digits_b.len()));
                if order != Ordering::Equal {
                    return order;
                }
                a = rest_a;
                b = rest_b;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a = &a[x.len_utf8()..];
                b = &b[y.len_utf8()..];
            }
        }
    }
}
