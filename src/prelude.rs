//! Everything needed to feed frames and read timelines back.
pub use crate::common_types::{Event, JobFlow, JobFlowState, JobHandle, ScheduledJobInfo};
pub use crate::config::ExtractorConfig;
pub use crate::{
    CacheOrchestrator, CacheOrchestratorBuilder, CacheState, FrameData, FrameRange, FrameSource,
    InMemorySource, RawFrame, RawSample, RawThread,
};
