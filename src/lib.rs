//! # train_envelope
//!
//! Train speed envelopes and running time allowances.
//!
//! This library provides the following modules:
//! - `physics` for the forces acting on a train and the time step integrator.
//! - `rolling_stock` and `sim_path` for simple train and track descriptions.
//! - `envelope_part`, `envelope` and `envelope_cursor` for speed curves and walking them.
//! - `constraints`, `part_builder` and `overlays` for building parts under bounds.
//! - `pipelines` for the speed limit, max speed and max effort envelopes.
//! - `allowance_value`, `coasting`, `binary_search` and `allowance` for slowing
//!   an envelope down by a requested amount of time (MARECO and linear).

pub mod allowance;
pub mod allowance_value;
pub mod binary_search;
pub mod coasting;
pub mod constraints;
pub mod envelope;
pub mod envelope_cursor;
pub mod envelope_part;
pub mod envelope_physics;
pub mod error;
pub mod overlays;
pub mod part_builder;
pub mod physics;
pub mod pipelines;
pub mod rolling_stock;
pub mod sim_path;

// Re-export main structs for convenience:
pub use allowance::{Allowance, AllowanceAlgorithm};
pub use allowance_value::{AllowanceDistribution, AllowanceRange, AllowanceValue};
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopePoint};
pub use envelope_part::{EnvelopeAttr, EnvelopePart, EnvelopeProfile};
pub use error::{AllowanceError, EnvelopeError, ErrorCause};
pub use physics::{Action, EnvelopeSimContext, PhysicsPath, PhysicsRollingStock};
pub use pipelines::{max_effort_envelope, max_speed_envelope, mrsp, SpeedSection};
pub use rolling_stock::SimpleRollingStock;
pub use sim_path::EnvelopeSimPath;
