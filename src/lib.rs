//! Deviational Monte Carlo phonon transport in 2D polygonal domains.
//!
//! A [`core::ModelBuilder`] assembles cells, materials, emitting walls and sensors into a
//! validated [`core::Model`]; a [`core::ModelSimulator`] steps phonon bundles through it and
//! reports calibrated sensor readings.
//!
//! Units: lengths in nm, times in ns, velocities in m/s (equal to nm/ns), energies in J.

pub mod core;
pub mod error;

pub use crate::error::{Error, Result};
