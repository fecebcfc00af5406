pub mod flow;
pub mod host;
pub mod submit;

pub use flow::{CaptureFlow, CaptureOutcome, FailureKind, FlowFailure, FlowSnapshot, FlowState};
pub use host::{GeolocationHost, HostError, HostPosition, PositionOptions, StaticHost};
pub use submit::{HttpSubmitter, LocationSink, SubmissionError};
