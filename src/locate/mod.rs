//! The `locate` module turns stored readings into a position estimate.
//!
//! - `estimator`: path-loss ranging and linearized multilateration.
//! - `rooms`: ranks configured rooms by distance to the estimate.
//! - `report`: the JSON estimation surface and the periodic publisher.

pub mod estimator;
pub mod report;
pub mod rooms;

pub use estimator::{LocationEstimator, PathLossModel, RangePoint, TriangulationResult, trilaterate};
pub use report::{EstimationReport, LocationPublisher, locate};
pub use rooms::{RoomMatch, rank_rooms};
