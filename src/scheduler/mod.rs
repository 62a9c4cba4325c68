pub mod job;
pub mod queue;
pub mod store;
pub mod submitter;

pub use job::{JobDescriptor, JobId, JobOutcome, JobRecord, JobStatus, JobUpdate, Verdict};
pub use queue::{QueueItem, SubmissionQueue};
pub use store::JobStore;
pub use submitter::Submitter;
