use envlink::{SessionSignal, SessionView};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusFormat {
    Text,
    Json,
}

impl StatusFormat {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(StatusFormat::Text),
            "json" => Some(StatusFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    state: &'static str,
    step_iter: i64,
    score: Option<f64>,
    task_complete: Option<f64>,
    task_bonus: Option<f64>,
    countdown: Option<u32>,
    obs: &'a serde_json::Value,
}

pub(crate) fn render_view(view: &SessionView<'_>, format: StatusFormat) -> String {
    let frame = view.frame;
    match format {
        StatusFormat::Json => {
            let record = StatusRecord {
                state: view.state.label(),
                step_iter: frame.step_iter,
                score: frame.score,
                task_complete: frame.task_complete,
                task_bonus: frame.task_bonus,
                countdown: view.countdown,
                obs: &frame.obs,
            };
            serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())
        }
        StatusFormat::Text => {
            let mut line = format!("state={}", view.state);
            if frame.has_data() {
                line.push_str(&format!(" step={}", frame.step_iter));
            }
            if let Some(score) = frame.score {
                line.push_str(&format!(" score={score}"));
            }
            if let Some(fraction) = frame.task_complete {
                line.push_str(&format!(" task={:.0}%", fraction * 100.0));
            }
            if let Some(remaining) = view.countdown {
                line.push_str(&format!(" countdown={remaining}"));
            }
            line
        }
    }
}

/// Line for a lifecycle signal, or `None` for signals shown through the view.
pub(crate) fn render_signal(signal: &SessionSignal, format: StatusFormat) -> Option<String> {
    let (name, detail) = match signal {
        SessionSignal::StateChanged { .. } => return None,
        SessionSignal::CountdownStarted { seconds } => ("countdown_started", json!(seconds)),
        SessionSignal::CountdownTick { remaining } => ("countdown", json!(remaining)),
        SessionSignal::PlaySound => ("sound", serde_json::Value::Null),
        SessionSignal::TaskDone => ("task_done", serde_json::Value::Null),
        SessionSignal::Fault { reason } => ("fault", json!(reason)),
        SessionSignal::ServerError(payload) => ("server_error", payload.clone()),
    };
    Some(match format {
        StatusFormat::Json => json!({ "signal": name, "detail": detail }).to_string(),
        StatusFormat::Text if detail.is_null() => name.to_string(),
        StatusFormat::Text => match detail {
            serde_json::Value::String(text) => format!("{name}: {text}"),
            other => format!("{name}: {other}"),
        },
    })
}

#[cfg(test)]
mod tests {
    use envlink::{EnvironmentState, ObservationFrame};
    use serde_json::Value;

    use super::*;

    #[test]
    fn text_view_lists_only_known_fields() {
        let placeholder = ObservationFrame::placeholder();
        let view = SessionView {
            state: EnvironmentState::Countdown,
            frame: &placeholder,
            countdown: Some(2),
        };
        assert_eq!(render_view(&view, StatusFormat::Text), "state=countdown countdown=2");

        let frame = ObservationFrame {
            step_iter: 4,
            score: Some(12.0),
            task_complete: Some(0.5),
            ..ObservationFrame::placeholder()
        };
        let view = SessionView {
            state: EnvironmentState::Started,
            frame: &frame,
            countdown: None,
        };
        assert_eq!(
            render_view(&view, StatusFormat::Text),
            "state=started step=4 score=12 task=50%"
        );
    }

    #[test]
    fn json_view_is_one_parseable_record() {
        let frame = ObservationFrame::placeholder();
        let view = SessionView {
            state: EnvironmentState::Fault,
            frame: &frame,
            countdown: None,
        };
        let parsed: Value = serde_json::from_str(&render_view(&view, StatusFormat::Json)).expect("json");
        assert_eq!(parsed["state"], "fault");
        assert_eq!(parsed["step_iter"], -1);
        assert!(parsed["score"].is_null());
    }

    #[test]
    fn signals_render_with_detail() {
        assert_eq!(
            render_signal(&SessionSignal::CountdownTick { remaining: 2 }, StatusFormat::Text),
            Some("countdown: 2".to_string())
        );
        assert_eq!(
            render_signal(
                &SessionSignal::Fault {
                    reason: "duplicate".to_string()
                },
                StatusFormat::Text
            ),
            Some("fault: duplicate".to_string())
        );
        assert_eq!(
            render_signal(&SessionSignal::TaskDone, StatusFormat::Json),
            Some(r#"{"detail":null,"signal":"task_done"}"#.to_string())
        );
        assert_eq!(
            render_signal(
                &SessionSignal::StateChanged {
                    from: EnvironmentState::Ready,
                    to: EnvironmentState::Countdown
                },
                StatusFormat::Text
            ),
            None
        );
        assert_eq!(StatusFormat::parse(" JSON "), Some(StatusFormat::Json));
    }
}
