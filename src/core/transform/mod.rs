//! Field Transform Library
//!
//! Pure functions converting one legacy field or shape into its target
//! representation:
//!
//! - [`record`] - the ordered transforms applied to published records
//! - [`draft`] - translation of open draft form values into deposit metadata
//! - [`normalize`] - shared shape helpers, including null flattening
//!
//! Transforms never fail on well-formed input. A broken legacy shape (for example
//! a creator with several affiliations) raises
//! [`LineageError::LegacyInvariant`](crate::domain::LineageError::LegacyInvariant).

pub mod draft;
pub mod normalize;
pub mod record;

pub use draft::translate_draft;
pub use normalize::{empty_if_none, empty_if_none_map};
pub use record::{transform_record, RecordEnv, RECORD_TRANSFORMS};
