//! Pipeline coordination: the per-dataset state machine and the idempotent
//! enrichment boundary invoked by the API layer.

mod coordinator;
mod enrich;

pub use coordinator::{
    Coordinator, DatasetSeed, EnrichOutcome, PipelineError, StageSkip,
};
pub use enrich::{
    AttemptSummary, DatasetSnapshot, EnrichRequest, EnrichResponse, EnrichmentService,
    ParsedSummary, ProgressEvent, PublicationRecord,
};
