//! Output formatting for CLI display.

use crate::model::{Metrics, TrainedModel};

/// Format a trained model: a summary line, then its hyperparameters indented.
pub(super) fn format_model(model: &TrainedModel) -> String {
    let short_guid = &model.model_guid.to_string()[..8];
    let mut out = format!(
        "#{} {short_guid}  task {}  variant {}  configuration {}  {}  {}",
        model.id,
        model.task_type_id,
        model.model_variant_id,
        model.configuration_id,
        model.last_trained_time.strftime("%Y-%m-%d %H:%M:%S"),
        format_scores(&model.scores),
    );
    for (name, value) in &model.hyperparameters {
        out.push_str(&format!("\n    {name} = {value}"));
    }
    out
}

/// Scores as `NAME=value` pairs in name order, four decimal places.
pub(super) fn format_scores(scores: &Metrics) -> String {
    if scores.is_empty() {
        return "no scores".to_string();
    }
    scores
        .iter()
        .map(|(name, value)| format!("{name}={value:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}
