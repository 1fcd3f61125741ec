//! Meta-controller.
//!
//! Every five minutes during market hours it builds a fixed-order
//! 35-dimensional feature vector from the current snapshot and recent
//! history, runs the frozen policy network (deterministic inference),
//! caps and renormalizes the resulting nine-group allocation, applies
//! regime gating (extreme VIX percentile, dealer gamma, or portfolio
//! delta raises a PAUSE directive), and ranks the next interval's
//! signals by `strength x allocation[group] x confidence` under the
//! five-total / two-per-group budget.

pub mod controller;
pub mod features;
pub mod policy;

pub use controller::{MetaController, MetaControllerConfig, PortfolioGreeks};
pub use features::{FeatureBuilder, FeatureVector, FEATURE_DIM, FEATURE_NAMES};
pub use policy::{Policy, PolicyError};
