//! Kamailio pseudo-variable (PV) mini-language.
//!
//! Parses the `$class(inner)` family of tokens that KEMI scripts embed inside
//! string literals and classifies each class into a [`PvCategory`].

pub mod classify;
pub mod parser;

pub use classify::{PvCategory, category_of, is_known_class, known_classes};
pub use parser::{ParsedPv, parse_pvs};
