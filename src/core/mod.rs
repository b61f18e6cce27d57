pub mod submission;
pub mod verdict;

pub use submission::{
    fixture_ref, InlineExample, Language, RequestContext, SubmissionRequest, SubmitCode,
};
pub use verdict::{Verdict, VerdictStatus};
