//! Archive-then-delete of log groups.

pub mod archiver;
pub mod aws;
pub mod catalog;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod model;
pub mod service;
pub mod sidecar;

pub use archiver::{
    ArchiveOptions, ArchiveReport, GroupArchive, GroupFailure, LogArchiver, PlannedGroup, SkippedGroup,
};
pub use aws::CloudWatchLogService;
pub use catalog::{GroupFilter, LogCatalog};
pub use model::{EventPage, LogEvent, LogGroup, LogStream, Page};
pub use service::LogService;
pub use sidecar::{Sidecar, WrittenSidecar};
