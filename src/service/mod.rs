pub mod adversarial;
pub mod category;
pub mod checkpoints;
pub mod confidence;
pub mod correction;
pub mod cross_domain;
pub mod derived;
pub mod domain;
pub mod domain_pass;
pub mod evidence;
pub mod extraction;
pub mod orchestrator;
pub mod retry;
pub mod review;
pub mod reviewer;
pub mod validator;

#[cfg(test)]
pub mod testing;

pub use checkpoints::CheckpointRegistry;
pub use correction::CorrectionPipeline;
pub use extraction::{ExtractionCollaborator, HttpExtractionClient, NullExtractor};
pub use orchestrator::Orchestrator;
pub use review::{QueueFilter, QueueItem, ReviewService};
pub use reviewer::{HttpSemanticReviewer, NoSignalReviewer, SemanticReviewer};
pub use validator::Validator;
