use async_trait::async_trait;
use coop_core::{CoopResult, Tool, ToolCall, ToolDescriptor, ToolResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

/// Refrigeration units reported for every store.
pub const UNITS: [&str; 4] = ["Freezer-1", "Freezer-2", "Fridge-Main", "Display-Case"];

const HEALTHY_SHARE: f64 = 0.9;

/// Health of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitStatus {
    /// Within the freezing band.
    Ok,
    /// Warmer than normal but below -10 °C.
    Warning,
    /// At or above -10 °C.
    Critical,
}

/// One unit reading.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReading {
    /// Unit name.
    pub unit_id: String,
    /// Reading rounded to one decimal.
    pub temperature_celsius: f64,
    /// Derived status.
    pub status: UnitStatus,
}

/// All readings for one store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    /// Store identifier as given.
    pub store_id: String,
    /// One entry per unit in [`UNITS`] order.
    pub units: Vec<UnitReading>,
}

/// Simulated refrigeration telemetry.
///
/// Each unit is healthy nine times in ten (-22 to -18 °C). Otherwise it reads
/// between -15 and -5 °C and is flagged `WARNING` below -10, `CRITICAL` above.
pub struct StoreTemperatureTool {
    descriptor: ToolDescriptor,
    rng: Mutex<StdRng>,
}

impl Default for StoreTemperatureTool {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl StoreTemperatureTool {
    /// Tool seeded from the OS.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic readings, for tests and demos.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "get_store_temperature",
                "Get the current temperature of the store's freezer/fridge units. \
                 Returns JSON with one reading and status (OK, WARNING, CRITICAL) per unit.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "store_id": {
                            "type": "string",
                            "description": "The ID of the store (e.g., 'S001')"
                        }
                    },
                    "required": ["store_id"]
                }),
            ),
            rng: Mutex::new(rng),
        }
    }

    /// Take one reading of every unit.
    pub fn report(&self, store_id: &str) -> StoreReport {
        let mut rng = self.rng.lock();
        let units = UNITS
            .iter()
            .map(|unit| {
                let (raw, healthy) = if rng.gen::<f64>() < HEALTHY_SHARE {
                    (rng.gen_range(-22.0..=-18.0), true)
                } else {
                    (rng.gen_range(-15.0..=-5.0), false)
                };
                let temperature_celsius = round1(raw);
                let status = match (healthy, temperature_celsius < -10.0) {
                    (true, _) => UnitStatus::Ok,
                    (false, true) => UnitStatus::Warning,
                    (false, false) => UnitStatus::Critical,
                };
                UnitReading {
                    unit_id: (*unit).to_string(),
                    temperature_celsius,
                    status,
                }
            })
            .collect();
        StoreReport {
            store_id: store_id.to_string(),
            units,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl Tool for StoreTemperatureTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall) -> CoopResult<ToolResult> {
        let store_id = match call.arguments["store_id"].as_str() {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Ok(ToolResult::error(&call.id, "Error (InvalidInput): store_id is required")),
        };
        let report = self.report(store_id);
        debug!(store_id, units = report.units.len(), "Store temperature read");
        Ok(ToolResult::success(
            &call.id,
            serde_json::to_string_pretty(&report)?,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_readings_stay_in_bands() {
        let tool = StoreTemperatureTool::seeded(7);
        let mut seen_faulty = false;
        for _ in 0..500 {
            for reading in tool.report("S001").units {
                let t = reading.temperature_celsius;
                assert_eq!(t, round1(t));
                match reading.status {
                    UnitStatus::Ok => assert!((-22.0..=-18.0).contains(&t), "{t}"),
                    UnitStatus::Warning => {
                        seen_faulty = true;
                        assert!((-15.0..-10.0).contains(&t), "{t}");
                    }
                    UnitStatus::Critical => {
                        seen_faulty = true;
                        assert!((-10.0..=-5.0).contains(&t), "{t}");
                    }
                }
            }
        }
        assert!(seen_faulty);
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = serde_json::to_value(StoreTemperatureTool::seeded(1).report("S1")).unwrap();
        let b = serde_json::to_value(StoreTemperatureTool::seeded(1).report("S1")).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_execute_returns_pretty_json() {
        let tool = StoreTemperatureTool::seeded(3);
        let result = tool
            .execute(ToolCall::new("get_store_temperature", json!({"store_id": "S001"})))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("\n  \"store_id\": \"S001\""));

        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        let units: Vec<&str> = parsed["units"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["unit_id"].as_str().unwrap())
            .collect();
        assert_eq!(units, UNITS);
        assert!(["OK", "WARNING", "CRITICAL"].contains(&parsed["units"][0]["status"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_store_id() {
        let result = StoreTemperatureTool::new()
            .execute(ToolCall::new("get_store_temperature", json!({})))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, "Error (InvalidInput): store_id is required");
    }
}
