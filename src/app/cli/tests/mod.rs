//! CLI test suite
