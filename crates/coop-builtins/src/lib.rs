//! Local tools shipped with Coop.
//!
//! The same tool values are served over stdio by `coop serve-tools`, or
//! registered in-process when `[local_tools] in_process = true`.

/// Marketing delegation tool.
pub mod consult;
/// Simulated refrigeration telemetry.
pub mod store_temperature;

pub use consult::ConsultTool;
pub use store_temperature::{StoreReport, StoreTemperatureTool, UnitReading, UnitStatus};

use coop_core::Tool;
use std::sync::Arc;

/// Tools served by the local stdio tool server or registered in-process.
pub fn local_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(StoreTemperatureTool::new())]
}
