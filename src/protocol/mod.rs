//! Wire protocol: the message envelope codec.
//!
//! The envelope is the only unit exchanged over the transport. Parsing is
//! total — malformed input degrades to a text envelope instead of failing —
//! and validation reports problems without throwing.

pub mod envelope;

pub use envelope::{Envelope, SizeCheck, ValidationReport};
