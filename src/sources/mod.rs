//! Input sources
//!
//! Every source implements [`InputSource`]. The variants differ only in how
//! they query their backing system.

pub mod issue_tracker;
pub mod mailbox;
pub mod scheduled;
pub mod traits;
pub mod webhook;

pub use issue_tracker::IssueTrackerSource;
pub use mailbox::MailboxSource;
pub use scheduled::ScheduledTriggerSource;
pub use traits::{InputItem, InputSource};
pub use webhook::{WebhookInbox, WebhookPayload, WebhookSource};
