//! Core simulation types for phonon transport in 2D polygonal domains.
//!
//! Layering, bottom-up: geometry, material and phonon state, surfaces and cells, events and
//! sensors, controllers and interpretation, and finally the model and the stepping engine.

pub mod builder;
pub mod cell;
pub mod composite;
pub mod controller;
pub mod event;
pub mod geometry;
pub mod interpreter;
pub mod material;
pub mod model;
pub mod phonon;
pub mod sensor;
pub mod simulator;
pub mod surface;

pub use builder::{
    Builder, CellOriginBuilder, PhasorBuilder, PhononBuilder, SurfaceOriginBuilder,
};
pub use cell::{Advance, Cell, CellId};
pub use composite::CompositeSurface;
pub use controller::{
    Controller, ControllerState, PeriodicConfig, PeriodicController, SensorController,
    SteadyStateConfig, SteadyStateController, StepClock, TransientConfig, TransientController,
};
pub use event::{Event, EventKind};
pub use geometry::{BoundingBox, Line, Point, Polygon, Triangle, Vector2D};
pub use interpreter::{
    BoundsPolicy, Calibration, Estimate, Harmonic, SensorInterpreter, SensorReading,
    TemperatureFit,
};
pub use material::{DispersionData, Material, MaterialId, RelaxationData, ScatterMechanism};
pub use model::{Model, ModelBuilder, SensorSpec, SimulationMode};
pub use phonon::{Phonon, Polarization, SpectralState};
pub use sensor::{Measurement, Sensor, SensorId, SensorLocation, SensorMeasurements, Tally};
pub use simulator::{
    run_iterative, AdaptiveStep, EnergyLedger, ModelSimulator, RunStatus, SimulationReport,
    SimulatorConfig, TemperatureIteration,
};
pub use surface::{DiffuseLaw, EmitSource, Surface, SurfaceId, SurfaceKind, SurfaceOutcome};
