//! Single-step browser agent: perceive a live page as a bounded semantic
//! tree, let a language model pick one action toward a goal, execute it.

pub mod agent;
pub mod brain;
pub mod config;
pub mod controller;
pub mod dom;
pub mod error;
pub mod events;
pub mod executor;
pub mod llm;
pub mod locator;
pub mod page;
pub mod session;
pub mod stabilize;
pub mod types;

pub use agent::{ActOutcome, Agent, TaskEnd, TaskOutcome};
pub use config::PilotConfig;
pub use controller::{StepController, StepReport};
pub use error::{PilotError, PilotResult};
pub use events::{AgentEvent, EventSink, Severity};
pub use llm::{OpenAiModel, StructuredModel, StructuredRequest};
pub use page::{ChromePage, PageHandle};
pub use session::{BrowserLifecycle, BrowserSession};
pub use types::{Action, ActionKind, Decision, PageSnapshot, Section, SemanticNode};
