//! Integration and property tests for consensim live under `tests/`.
