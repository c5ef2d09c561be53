//! This crate turns the raw samples of a frame based profiler into
//! per-frame timelines of events and jobs.
//!
//! Frames are processed on a rayon thread pool, in two stages: events extraction
//! and level reindexing. A `CacheOrchestrator`, polled once per tick by its owner,
//! decides which frames to process and keeps the finished ones around.
#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod common_types;
pub mod config;
mod errors;
pub use crate::errors::{Error, MetadataError, Result};
pub mod metadata;
mod raw_frame;
pub use crate::raw_frame::{Category, FrameSource, InMemorySource, RawFrame, RawSample, RawThread};
mod strings;
pub use crate::strings::{NameIndex, NameTables};
mod frame_data;
pub use crate::frame_data::{FrameData, ThreadGroup, ThreadInfo};
mod extractor;
pub use crate::extractor::EventExtractor;
mod reindex;
pub use crate::reindex::LevelReindexer;
mod pipeline;
pub use crate::pipeline::process_frame;
mod orchestrator;
pub use crate::orchestrator::{CacheOrchestrator, CacheState, FrameRange};
mod builder;
pub use crate::builder::CacheOrchestratorBuilder;
pub mod prelude;
