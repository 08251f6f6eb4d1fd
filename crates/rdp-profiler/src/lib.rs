//! Prompt construction, output normalization and quality scoring for dog profiles.

pub mod config;
pub mod normalize;
pub mod prompts;
pub mod quality;

pub use config::{ConfigError, OrganizationConfig, OrganizationConfigLoader};
pub use normalize::{normalize_profile, truncate_text, NormalizeContext};
pub use prompts::{PromptBuilder, PromptTemplate};
pub use quality::{QualityIssue, QualityReport, QualityRubric, Recommendation, RubricWeights};

pub const CRATE_NAME: &str = "rdp-profiler";
