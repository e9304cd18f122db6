//! Logit post-processing: sanitize, softmax, top-k.

use serde::{Deserialize, Serialize};

use crate::error::{ClassifyError, ClassifyResult};

/// Number of predictions returned per request.
pub const TOP_K: usize = 3;

/// One ranked class with its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
}

/// Replace NaN and ±Inf with 0 in place.
pub fn sanitize_logits(logits: &mut [f32]) {
    for v in logits.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

/// Numerically stable softmax over a finite logit vector.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest values, descending; ties go to the lower index.
pub fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // Stable sort keeps ascending index order among equal values
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);
    order
}

/// Turn raw logits into the top-3 class predictions.
pub fn rank(logits: &[f32], classes: &[String]) -> ClassifyResult<Vec<Prediction>> {
    if classes.len() < TOP_K {
        return Err(ClassifyError::InsufficientClasses {
            required: TOP_K,
            available: classes.len(),
        });
    }
    if logits.len() != classes.len() {
        return Err(ClassifyError::Internal(format!(
            "classifier produced {} logits for {} classes",
            logits.len(),
            classes.len()
        )));
    }

    let mut logits = logits.to_vec();
    sanitize_logits(&mut logits);
    let probs = softmax(&logits);

    Ok(top_k(&probs, TOP_K)
        .into_iter()
        .map(|idx| Prediction {
            class: classes[idx].clone(),
            confidence: probs[idx],
        })
        .collect())
}
