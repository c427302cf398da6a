//! Assistant invocation: process lifecycle, transcript capture and the
//! cancellation context the caller supplies.

pub mod context;
pub mod process;
pub mod session;
pub mod transcript;

pub use context::InvokeContext;
pub use process::{Invoker, ProcessInvoker};
pub use session::AssistantSession;
pub use transcript::{Completion, Transcript, TranscriptParser};
