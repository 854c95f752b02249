//! Input ingestion: polling external sources into processed work items

pub mod orchestrator;
pub mod state_tracker;

pub use orchestrator::{
    ChannelProcessor, InputOrchestrator, ItemProcessor, JobTriggerProcessor, LoggingProcessor,
    PollReport, SCHEDULED_SOURCE_NAME,
};
pub use state_tracker::StateTracker;
