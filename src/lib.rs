//! cyclr - issue-to-merge lifecycle orchestration
//!
//! cyclr drives one issue through code generation, pull-request creation, CI and
//! review, looping back with feedback until the change is merged or a bound is hit.

pub mod cancel;
pub mod classify;
pub mod collab;
pub mod domain;
pub mod driver;
pub mod error;
pub mod id;
pub mod machine;
pub mod retry;
pub mod storage;

pub use error::{CyclrError, Result};
