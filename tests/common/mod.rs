//! Fixtures shared by the functional, proptest and integration suites.

#![allow(dead_code)]

pub mod fixtures;
