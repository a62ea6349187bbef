#![allow(unused_crate_dependencies)] // false positives because there is both a library and a binary

//! Integration Tests (IT)
//!
//! Every integration test lives in this single binary, organized in modules, so the
//! library crates are linked once instead of once per test file.

mod framing;
