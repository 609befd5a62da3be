//! Domain model (IDs, names, runs, messages, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod names;
pub mod run;

pub use errors::JobError;
pub use ids::{InvocationId, JobRunId, MessageId};
pub use message::{JobMessage, MalformedMessage, QueuedMessage, Trigger};
pub use names::{EventName, JobName};
pub use run::{JobRun, NewJobRun, RunStatus};
