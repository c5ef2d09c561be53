//! Job metadata blocks attached to profiler samples.
//!
//! Every block starts with a header (magic, version, tag), all fields
//! being little endian `u32`s. The tag then decides the payload:
//!
//! | tag | meaning  | payload                                                  |
//! |-----|----------|----------------------------------------------------------|
//! | 1   | allocate | handle, count, grain size, dependencies number, handles |
//! | 2   | combine  | same as allocate                                         |
//! | 3   | schedule | same as allocate                                         |
//! | 4   | wait     | handle                                                   |
//! | 5   | complete | handle                                                   |
//! | 6   | begin    | handle                                                   |
//! | 7   | end      | nothing                                                  |
//!
//! a handle is always stored as (index, generation).
use crate::common_types::{JobFlowState, JobHandle};
use crate::config::{METADATA_MAGIC, METADATA_VERSION};
use crate::errors::MetadataError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// How a job got scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// job is allocated
    Allocate,
    /// several handles are combined into a new one
    Combine,
    /// job is pushed to the workers
    Schedule,
}

/// All types of job metadata we can decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMetadata {
    /// A job is scheduled. Invalid dependencies are already filtered out.
    Schedule {
        /// kind of scheduling
        kind: ScheduleKind,
        /// scheduled job
        handle: JobHandle,
        /// number of iterations
        count: u32,
        /// iterations per batch
        grain_size: u32,
        /// jobs we depend on
        dependencies: Vec<JobHandle>,
    },
    /// Someone waited for a job (or found it completed).
    Wait(JobHandle, JobFlowState),
    /// A job starts executing.
    Begin(JobHandle),
    /// The most recent executing job ends.
    End,
}

const TAG_ALLOCATE: u32 = 1;
const TAG_COMBINE: u32 = 2;
const TAG_SCHEDULE: u32 = 3;
const TAG_WAIT: u32 = 4;
const TAG_COMPLETE: u32 = 5;
const TAG_BEGIN: u32 = 6;
const TAG_END: u32 = 7;

fn read_handle_from<R: io::Read>(source: &mut R) -> io::Result<JobHandle> {
    Ok(JobHandle::new(
        source.read_u32::<LittleEndian>()?,
        source.read_u32::<LittleEndian>()?,
    ))
}

fn write_handle_to<W: io::Write>(handle: JobHandle, destination: &mut W) -> io::Result<()> {
    destination.write_u32::<LittleEndian>(handle.index)?;
    destination.write_u32::<LittleEndian>(handle.generation)
}

impl JobMetadata {
    /// Decode a metadata block.
    pub fn decode(mut block: &[u8]) -> Result<Self, MetadataError> {
        let source = &mut block;
        let magic = source.read_u32::<LittleEndian>()?;
        if magic != METADATA_MAGIC {
            return Err(MetadataError::BadMagic(magic));
        }
        let version = source.read_u32::<LittleEndian>()?;
        if version != METADATA_VERSION {
            return Err(MetadataError::UnsupportedVersion(version));
        }
        let tag = source.read_u32::<LittleEndian>()?;
        let metadata = match tag {
            TAG_ALLOCATE | TAG_COMBINE | TAG_SCHEDULE => {
                let kind = match tag {
                    TAG_ALLOCATE => ScheduleKind::Allocate,
                    TAG_COMBINE => ScheduleKind::Combine,
                    _ => ScheduleKind::Schedule,
                };
                let handle = read_handle_from(source)?;
                let count = source.read_u32::<LittleEndian>()?;
                let grain_size = source.read_u32::<LittleEndian>()?;
                let dependencies_number = source.read_u32::<LittleEndian>()? as usize;
                // never trust the announced size for the allocation
                let mut dependencies = Vec::with_capacity(dependencies_number.min(source.len() / 8));
                for _ in 0..dependencies_number {
                    let dependency = read_handle_from(source)?;
                    if dependency.is_valid() {
                        dependencies.push(dependency)
                    }
                }
                JobMetadata::Schedule {
                    kind,
                    handle,
                    count,
                    grain_size,
                    dependencies,
                }
            }
            TAG_WAIT => JobMetadata::Wait(read_handle_from(source)?, JobFlowState::WaitedOn),
            TAG_COMPLETE => {
                JobMetadata::Wait(read_handle_from(source)?, JobFlowState::CompletedNoWait)
            }
            TAG_BEGIN => JobMetadata::Begin(read_handle_from(source)?),
            TAG_END => JobMetadata::End,
            _ => return Err(MetadataError::UnknownTag(tag)),
        };
        Ok(metadata)
    }

    /// Encode us as a metadata block (what a producer attaches to a sample).
    pub fn write_to<W: io::Write>(&self, destination: &mut W) -> io::Result<()> {
        destination.write_u32::<LittleEndian>(METADATA_MAGIC)?;
        destination.write_u32::<LittleEndian>(METADATA_VERSION)?;
        match self {
            JobMetadata::Schedule {
                kind,
                handle,
                count,
                grain_size,
                dependencies,
            } => {
                destination.write_u32::<LittleEndian>(match kind {
                    ScheduleKind::Allocate => TAG_ALLOCATE,
                    ScheduleKind::Combine => TAG_COMBINE,
                    ScheduleKind::Schedule => TAG_SCHEDULE,
                })?;
                write_handle_to(*handle, destination)?;
                destination.write_u32::<LittleEndian>(*count)?;
                destination.write_u32::<LittleEndian>(*grain_size)?;
                destination.write_u32::<LittleEndian>(dependencies.len() as u32)?;
                dependencies
                    .iter()
                    .try_for_each(|d| write_handle_to(*d, destination))?;
            }
            JobMetadata::Wait(handle, state) => {
                let tag = if *state == JobFlowState::CompletedNoWait {
                    TAG_COMPLETE
                } else {
                    TAG_WAIT
                };
                destination.write_u32::<LittleEndian>(tag)?;
                write_handle_to(*handle, destination)?;
            }
            JobMetadata::Begin(handle) => {
                destination.write_u32::<LittleEndian>(TAG_BEGIN)?;
                write_handle_to(*handle, destination)?;
            }
            JobMetadata::End => destination.write_u32::<LittleEndian>(TAG_END)?,
        }
        Ok(())
    }

    /// Encode us into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)
            .expect("writing into a vector cannot fail");
        bytes
    }
}
