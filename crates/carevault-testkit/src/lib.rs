//! # CareVault Testkit
//!
//! Testing utilities for CareVault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known hashes, derived keys and AEAD outputs
//! - **Generators**: Proptest strategies for ids, access types, grants
//! - **Fixtures**: A seeded broker with the hospital/lab/pharmacy scenario
//!
//! ## Golden Vectors
//!
//! ```rust
//! use carevault_testkit::vectors::verify_all_vectors;
//!
//! verify_all_vectors().unwrap();
//! ```
//!
//! ## Scenarios
//!
//! ```rust,ignore
//! use carevault_testkit::fixtures::{Scenario, HOSPITAL, PATIENT_RESOURCE, PATIENT_RECORD};
//!
//! let scenario = Scenario::new().await?;
//! let record = scenario.broker.retrieve(PATIENT_RESOURCE, HOSPITAL).await?;
//! assert_eq!(&record.data[..], PATIENT_RECORD);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    Scenario, HOSPITAL, LAB, PATIENT_RECORD, PATIENT_RESOURCE, PATIENT_RESOURCE_TYPE, PHARMACY,
};
pub use vectors::{aead_vectors, hash_vectors, kdf_vectors, verify_all_vectors};
