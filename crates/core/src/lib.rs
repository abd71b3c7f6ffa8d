//! Domain core for the Dastyar shopping assistant.
//!
//! Everything here is I/O-free: the scenario vocabulary, the conversation
//! turn/constraint model, the canonical response shape, configuration
//! loading, the error taxonomy, and Persian text normalization. Storage and
//! model backends live in `dastyar-db` and `dastyar-agent`.

pub mod config;
pub mod domain;
pub mod errors;
pub mod text;

pub use domain::catalog::{CandidateShop, ProductHit};
pub use domain::conversation::{Constraint, ConversationTurn, ExtraInfoConversation, PriceRange};
pub use domain::response::NormalizedResponse;
pub use domain::scenario::ScenarioLabel;
pub use errors::{AgentError, DomainError, InterfaceError};
pub use text::normalize_persian;
