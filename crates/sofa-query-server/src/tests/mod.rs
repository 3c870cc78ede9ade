//! Crate-internal test fixtures and behaviour tests.

pub(crate) mod support;
