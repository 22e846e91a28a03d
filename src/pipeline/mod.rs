// Listing pipeline: processing stages, the orchestrator that chains them,
// and flat output rows

pub mod orchestrator;
pub mod output;
pub mod processing;

pub use orchestrator::{Pipeline, PipelineOutput, PipelineReport};
pub use output::{to_output_rows, write_output, OutputRow};
