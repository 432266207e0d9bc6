//! Session-scoped, reversible PII masking.
//!
//! - Detector: pattern detectors per entity class, fixed priority order
//! - Session: token maps behind the `SessionStore` trait
//! - Masker: substitution and restoration against a session

pub mod detector;
pub mod masker;
pub mod session;

pub use detector::{PiiDetector, PiiKind, PiiSpan};
pub use masker::{MaskReport, MaskedEntity, PiiMasker, UnmaskReport};
pub use session::{spawn_session_sweeper, InMemorySessionStore, Session, SessionStore};
