//! Intermediate representation for uRPC schemas.
//!
//! The IR is what the compiler hands to code generators: every import is
//! merged, every type reference is resolved, docs are normalized and every
//! pattern is pre-split into segments. It carries no source positions.
//!
//! ```
//! use urpc_schema::*;
//!
//! let pattern = Pattern::new(
//!     "UserEvents".to_owned(),
//!     "events.users.{userId}.{eventType}".to_owned(),
//!     vec![
//!         Segment::Literal("events.users.".to_owned()),
//!         Segment::Placeholder("userId".to_owned()),
//!         Segment::Literal(".".to_owned()),
//!         Segment::Placeholder("eventType".to_owned()),
//!     ],
//! );
//!
//! assert_eq!(pattern.placeholders, ["userId", "eventType"]);
//! assert_eq!(pattern.render(&["user123", "created"]).unwrap(), "events.users.user123.created");
//! ```

pub mod error;
pub mod ir;
pub mod pattern;

pub use error::*;
pub use ir::*;
pub use pattern::*;
