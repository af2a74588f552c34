//! Selects the regex engine at compile time.
//!
//! `regex` is the default; the `lite` feature swaps in `regex-lite` for
//! smaller binaries. Only the subset of the API both crates share is used.

#[cfg(feature = "regex")]
pub(crate) use ::regex::{Captures, Regex};

#[cfg(all(feature = "lite", not(feature = "regex")))]
pub(crate) use ::regex_lite::{Captures, Regex};

#[cfg(not(any(feature = "regex", feature = "lite")))]
compile_error!("either the `regex` or the `lite` feature must be enabled");
