//! Analyzer + Prioritizer + Synthesizer (§4.6): post-run deep analysis that
//! turns raw session steps into scored, deduplicated issues and a
//! study-level synthesis.

pub mod analyzer;
pub mod prioritizer;
pub mod synthesizer;

pub use analyzer::{analyze_session, page_url_for_key, to_durable_issue, AnalysisResult, PageAnalysis, RawUxIssue};
pub use prioritizer::prioritize_study_issues;
pub use synthesizer::{synthesize_study, StudySynthesis};
