pub mod batch;
pub mod categorize;
pub mod lead_scoring;
pub mod openai;
pub mod provider;
pub mod reply;
pub mod schema;
pub mod spam_filter;
pub mod text;

pub use batch::{classify_in_batches, BatchConfig, BatchOutcome, Identified};
pub use categorize::{CategoryAssignment, CategoryClassifier};
pub use lead_scoring::{LeadForScoring, LeadScorer, LeadScoringOutcome};
pub use openai::OpenAiProvider;
pub use provider::{complete_structured, CompletionRequest, LlmProvider, ResponseFormat};
pub use reply::{ReplyGenerator, ReplyTarget};
pub use schema::StructuredOutput;
pub use spam_filter::{SpamFilter, SpamVerdict};
