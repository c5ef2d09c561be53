//! One frame's trip through the worker pool.
use crate::common_types::FrameIndex;
use crate::config::ExtractorConfig;
use crate::extractor::EventExtractor;
use crate::frame_data::FrameData;
use crate::raw_frame::RawFrame;
use crate::reindex::LevelReindexer;
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    /// each thread keeps its reindexing scratch buffers between frames
    static REINDEXER: RefCell<Option<LevelReindexer>> = RefCell::new(None);
}

/// Reindex with this thread's reindexer, creating it if needed.
/// A reindexer is only given back after a successful run: a panic leaves
/// its scratch buffers half filled.
fn reindex(frame: &mut FrameData, max_levels: usize) {
    let mut reindexer = REINDEXER
        .with(|cell| cell.borrow_mut().take())
        .filter(|reindexer| reindexer.max_levels() == max_levels)
        .unwrap_or_else(|| LevelReindexer::new(max_levels));
    reindexer.reindex(frame);
    REINDEXER.with(|cell| *cell.borrow_mut() = Some(reindexer));
}

/// Where a pipeline stands.
pub(crate) enum PipelineStatus {
    /// still running on the pool
    Running,
    /// both stages completed, frame data is handed back
    Finished(FrameData),
    /// a stage panicked, nothing will come
    Failed,
}

/// Extraction followed by reindexing, for one frame.
///
/// The frame data is moved into the extraction task, handed to the
/// reindexing task and sent back to us when done: only one of them
/// owns it at any time.
pub(crate) struct Pipeline {
    receiver: Receiver<FrameData>,
}

impl Pipeline {
    /// Start extracting given frame on the pool.
    /// Reindexing is spawned by the extraction task when it completes.
    pub(crate) fn spawn(
        pool: &rayon::ThreadPool,
        snapshot: Arc<RawFrame>,
        mut frame: FrameData,
        index: FrameIndex,
        config: Arc<ExtractorConfig>,
    ) -> Self {
        let (sender, receiver) = bounded(1);
        pool.spawn(move || {
            EventExtractor::new(&config, &mut frame).extract(&snapshot, index);
            drop(snapshot);
            rayon::spawn(move || {
                reindex(&mut frame, config.max_levels);
                // the receiver outlives us unless the orchestrator is leaked
                let _ = sender.send(frame);
            });
        });
        Pipeline { receiver }
    }

    /// Non blocking completion check.
    pub(crate) fn poll(&self) -> PipelineStatus {
        match self.receiver.try_recv() {
            Ok(frame) => PipelineStatus::Finished(frame),
            Err(TryRecvError::Empty) => PipelineStatus::Running,
            Err(TryRecvError::Disconnected) => PipelineStatus::Failed,
        }
    }

    /// Block until both stages complete.
    pub(crate) fn wait(&self) -> Option<FrameData> {
        self.receiver.recv().ok()
    }
}

/// Run both stages on the calling thread.
pub fn process_frame(raw: &RawFrame, config: &ExtractorConfig) -> FrameData {
    let mut frame = FrameData::with_capacity(raw.index, raw.sample_count());
    EventExtractor::new(config, &mut frame).extract(raw, raw.index);
    reindex(&mut frame, config.max_levels);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_frame::{RawSample, RawThread};

    fn raw_frame() -> Arc<RawFrame> {
        Arc::new(RawFrame {
            index: 4,
            threads: vec![RawThread::new("Main Thread", 1, "").samples(vec![
                RawSample::new("root", 1, 0, 10).children(1),
                RawSample::new("child", 2, 0, 5),
                RawSample::new("other", 3, 10, 5),
            ])],
            ..Default::default()
        })
    }

    #[test]
    fn pool_and_caller_agree() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let raw = raw_frame();
        let expected = process_frame(&raw, &ExtractorConfig::default());
        let pipeline = Pipeline::spawn(
            &pool,
            raw.clone(),
            FrameData::with_capacity(4, 3),
            4,
            Arc::new(ExtractorConfig::default()),
        );
        let frame = pipeline.wait().unwrap();
        assert_eq!(frame.events, expected.events);
        assert_eq!(frame.threads[0].levels, vec![0..2, 2..3]);
        assert_eq!(frame.event_name(2), Some("child"));
    }

    #[test]
    fn reindexers_are_reused() {
        let config = ExtractorConfig {
            max_levels: 8,
            ..Default::default()
        };
        process_frame(&raw_frame(), &config);
        let kept = REINDEXER.with(|cell| cell.borrow().as_ref().map(|r| r.max_levels()));
        assert_eq!(kept, Some(8));
        let frame = process_frame(&raw_frame(), &config);
        assert_eq!(frame.threads[0].levels, vec![0..2, 2..3]);
    }

    #[test]
    fn failed_reindexers_are_not_reused() {
        // two levels do not fit in a one level reindexer
        let mut frame = process_frame(&raw_frame(), &ExtractorConfig::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reindex(&mut frame, 1)
        }));
        assert!(result.is_err());
        assert!(REINDEXER.with(|cell| cell.borrow().is_none()));

        let flat = RawFrame {
            threads: vec![RawThread::new("Main Thread", 1, "").samples(vec![
                RawSample::new("a", 1, 0, 5),
                RawSample::new("b", 2, 5, 5),
            ])],
            ..Default::default()
        };
        let config = ExtractorConfig {
            max_levels: 1,
            ..Default::default()
        };
        let frame = process_frame(&flat, &config);
        assert_eq!(frame.threads[0].levels, vec![0..2]);
    }

    #[test]
    fn panicking_pipelines_fail() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .panic_handler(|_| ())
            .build()
            .unwrap();
        // two levels do not fit in a one level reindexer
        let mut frame = process_frame(&raw_frame(), &ExtractorConfig::default());
        let (sender, receiver) = bounded::<FrameData>(1);
        pool.spawn(move || {
            LevelReindexer::new(1).reindex(&mut frame);
            let _ = sender.send(frame);
        });
        let pipeline = Pipeline { receiver };
        assert!(pipeline.wait().is_none());
    }
}
