pub mod actions;
pub mod compiler;
pub mod dsl;
pub mod error;
pub mod model;
pub mod nodes;
pub mod resources;
pub mod runtime;

pub use error::{FlowError, FlowResult};
pub use model::Model;
pub use runtime::simulation::{RunReport, Simulation, SimulationConfig};
