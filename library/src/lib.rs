//! Independent and project agnostic libraries
//!
//! Everything in here has been built for the compile gateway but is in no way bound to it.
//! The broker backends, the correlation engine and the small helpers could be extracted into
//! their own crates at any given time. Anything tied to the HTTP surface or the command line
//! lives in the `modules` crate instead.

#![deny(missing_docs)]
// Disable the lint for now as it has a high false-positive rate
#![allow(unknown_lints, clippy::nonstandard_macro_braces)]

pub mod communication;
pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
