mod candidate;
mod code;

pub use candidate::CandidateFile;
pub use code::ExtractedCode;
