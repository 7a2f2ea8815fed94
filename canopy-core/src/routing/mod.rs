//! Provider registry, selection, and fault-tolerant dispatch

pub mod circuit;
pub mod error;
pub mod registry;
pub mod retry;
pub mod router;
pub mod selection;

pub use circuit::{Admission, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{RouterError, RouterResult};
pub use registry::{ProviderRegistry, ProviderSlot, ProviderStatus};
pub use retry::RetryPolicy;
pub use router::{Router, RouterBuilder};
pub use selection::{select, CandidateInfo, QualityMode, Selection, SelectionCriteria, SelectionError};
