//! The consensus engines and their shared machinery.
//!
//! This module provides:
//! - **errors**: Error types for run failures
//! - **graph**: Agent graph snapshot the engines mutate in place
//! - **numeric_kernels**: Dense matrices, eigenvalues and summary statistics
//! - **weights**: Mixing matrix construction and validation
//! - **run**: Run configuration and loop plumbing
//! - **faults**: Transmission failure and membership churn
//! - **synchronous**, **asynchronous**, **gossip**, **pdmm**: one engine family each
//! - **protocol**: Name-based dispatch over all engines

pub mod asynchronous;
pub mod errors;
pub mod faults;
pub mod gossip;
pub mod graph;
pub mod numeric_kernels;
pub mod pdmm;
pub mod protocol;
pub mod run;
pub mod synchronous;
pub mod weights;
