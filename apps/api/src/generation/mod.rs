// Slide generation: prompt construction, the sequential pipeline and the
// incremental publisher that persists each slide as soon as it exists.
// All model calls go through llm_client.

pub mod pipeline;
pub mod prompts;
pub mod publisher;
