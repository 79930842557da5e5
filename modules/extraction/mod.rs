//! Recovery of structured attributes from untrusted model output

pub mod extractor;
pub mod literal;
pub mod sanitize;

pub use extractor::{find_candidate, CandidateSource, Extracted, ExtractionStage, ResponseExtractor};
pub use literal::{parse_literal, LiteralError};
pub use sanitize::sanitize_line;
