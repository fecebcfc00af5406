pub mod capture;
pub mod payload;
pub mod point;
pub mod record;

pub use capture::CapturedPoint;
pub use payload::SubmissionPayload;
pub use point::GeoPoint;
pub use record::{LocationRecord, NewLocation};

/// Identity used for every submission in the single-user demo.
pub const DEMO_SUBJECT_ID: &str = "demo-user";
