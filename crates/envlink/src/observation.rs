use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `step_iter` of a frame that carries no step data.
pub const NO_STEP: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfoEntry {
    pub name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
}

/// Latest server-pushed step for one environment instance.
///
/// Numeric progress fields are `None` until the backend has reported them;
/// the backend sends some of them as formatted strings ("0.50"), which are
/// accepted as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationFrame {
    #[serde(default = "no_step")]
    pub step_iter: i64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub reward: Option<f64>,
    #[serde(default)]
    pub obs: Value,
    #[serde(default, deserialize_with = "lenient_number")]
    pub task_complete: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub score: Option<f64>,
    #[serde(default)]
    pub task_info: Vec<TaskInfoEntry>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub task_bonus: Option<f64>,
    #[serde(default)]
    pub done: bool,
}

impl Default for ObservationFrame {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl ObservationFrame {
    pub fn placeholder() -> Self {
        Self {
            step_iter: NO_STEP,
            reward: None,
            obs: Value::Object(Default::default()),
            task_complete: None,
            score: None,
            task_info: Vec::new(),
            task_bonus: None,
            done: false,
        }
    }

    /// Frame shown between rounds: per-step fields cleared, running totals kept.
    pub fn carried_forward(&self) -> Self {
        Self {
            step_iter: NO_STEP,
            obs: Value::Object(Default::default()),
            done: false,
            reward: self.reward,
            task_complete: self.task_complete,
            score: self.score,
            task_info: self.task_info.clone(),
            task_bonus: self.task_bonus,
        }
    }

    pub fn has_data(&self) -> bool {
        self.step_iter != NO_STEP
    }

    pub fn task_done(&self) -> bool {
        self.task_complete.is_some_and(|fraction| fraction >= 1.0)
    }
}

fn no_step() -> i64 {
    NO_STEP
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number.as_f64()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("expected a number, got '{text}'")))
        }
        other => Err(de::Error::custom(format!("expected a number, got {other}"))),
    }
}
