//! The draft / approve / execute / answer pipeline.

mod composer;
mod controller;
mod drafter;
mod executor;
mod graph;
mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use composer::{AnswerComposer, answer_prompt};
pub use controller::{Decision, Pipeline, RunReport, SessionSnapshot};
pub use drafter::{QueryDrafter, TOP_K, query_output_shape};
pub use executor::QueryExecutor;
pub use graph::{mermaid, save_graph};
pub use state::{PipelineError, RequestState, Stage, StepUpdate};
