//! # rootstrap-definition
//!
//! Parser and model for bootstrap definition files.
//!
//! A definition is a block of `Key: value` header lines followed by named
//! `%section` bodies:
//!
//! ```text
//! Bootstrap: debootstrap
//! OSVersion: bookworm
//!
//! %post
//!     apt-get -y install curl
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod model;
pub mod parser;

pub use model::{Definition, Section};
pub use parser::{load, parse};
