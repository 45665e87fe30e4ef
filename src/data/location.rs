//! Where a trace is scoped: an experiment or an inference table

use serde::{Deserialize, Serialize};
use std::fmt;

use super::wire_enum::{wire_enum_serde, WireEnum};

/// Wire selector for [`TraceLocation`]. The model derives it from the variant
/// so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraceLocationType {
    #[default]
    Unspecified,
    MlflowExperiment,
    InferenceTable,
}

impl WireEnum for TraceLocationType {
    const PREFIX: &'static str = "TRACE_LOCATION_TYPE_";
    const NAME: &'static str = "trace location type";

    fn as_str(&self) -> &'static str {
        match self {
            TraceLocationType::Unspecified => "TRACE_LOCATION_TYPE_UNSPECIFIED",
            TraceLocationType::MlflowExperiment => "MLFLOW_EXPERIMENT",
            TraceLocationType::InferenceTable => "INFERENCE_TABLE",
        }
    }

    fn as_i32(&self) -> i32 {
        *self as i32
    }

    fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(TraceLocationType::Unspecified),
            1 => Some(TraceLocationType::MlflowExperiment),
            2 => Some(TraceLocationType::InferenceTable),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "TRACE_LOCATION_TYPE_UNSPECIFIED" | "UNSPECIFIED" => {
                Some(TraceLocationType::Unspecified)
            }
            "MLFLOW_EXPERIMENT" => Some(TraceLocationType::MlflowExperiment),
            "INFERENCE_TABLE" => Some(TraceLocationType::InferenceTable),
            _ => None,
        }
    }
}

wire_enum_serde!(TraceLocationType);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MlflowExperimentLocation {
    pub experiment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InferenceTableLocation {
    /// `catalog.schema.table`
    pub full_table_name: String,
}

impl InferenceTableLocation {
    /// Split into `(catalog, schema, table)`; `None` unless there are exactly three parts
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        let mut parts = self.full_table_name.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(catalog), Some(schema), Some(table), None) => Some((catalog, schema, table)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceLocation {
    MlflowExperiment(MlflowExperimentLocation),
    InferenceTable(InferenceTableLocation),
}

impl TraceLocation {
    pub fn experiment(experiment_id: impl Into<String>) -> Self {
        TraceLocation::MlflowExperiment(MlflowExperimentLocation {
            experiment_id: experiment_id.into(),
        })
    }

    pub fn inference_table(full_table_name: impl Into<String>) -> Self {
        TraceLocation::InferenceTable(InferenceTableLocation {
            full_table_name: full_table_name.into(),
        })
    }

    pub fn location_type(&self) -> TraceLocationType {
        match self {
            TraceLocation::MlflowExperiment(_) => TraceLocationType::MlflowExperiment,
            TraceLocation::InferenceTable(_) => TraceLocationType::InferenceTable,
        }
    }
}

impl fmt::Display for TraceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLocation::MlflowExperiment(loc) => write!(f, "experiment '{}'", loc.experiment_id),
            TraceLocation::InferenceTable(loc) => {
                write!(f, "inference table '{}'", loc.full_table_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_type_follows_variant() {
        assert_eq!(
            TraceLocation::experiment("1").location_type(),
            TraceLocationType::MlflowExperiment
        );
        assert_eq!(
            TraceLocation::inference_table("main.default.requests").location_type(),
            TraceLocationType::InferenceTable
        );
    }

    #[test]
    fn test_table_parts() {
        let loc = InferenceTableLocation {
            full_table_name: "main.default.requests".to_string(),
        };
        assert_eq!(loc.parts(), Some(("main", "default", "requests")));

        let loc = InferenceTableLocation {
            full_table_name: "default.requests".to_string(),
        };
        assert_eq!(loc.parts(), None);

        let loc = InferenceTableLocation {
            full_table_name: "a.b.c.d".to_string(),
        };
        assert_eq!(loc.parts(), None);
    }

    #[test]
    fn test_location_serde_carries_type() {
        let json = serde_json::to_value(TraceLocation::experiment("42")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "MLFLOW_EXPERIMENT", "experiment_id": "42"})
        );
        let back: TraceLocation = serde_json::from_value(json).unwrap();
        assert_eq!(back, TraceLocation::experiment("42"));
    }
}
