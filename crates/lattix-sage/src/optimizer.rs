//! Adam optimizer over shared [`Weights`].
//!
//! Moment state is keyed by weights identity and lives as long as the
//! optimizer, i.e. the whole training run. Concurrent batches each call
//! [`AdamOptimizer::update`] with their own context; a weight's moments and
//! values are updated together under that weight's state lock, so two batches
//! never interleave inside one tensor's step.

use crate::autodiff::{ComputationContext, Weights, WeightsId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Moments {
    first: Vec<f64>,
    second: Vec<f64>,
    step: i32,
}

#[derive(Debug)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    state: Mutex<HashMap<WeightsId, Arc<Mutex<Moments>>>>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Step every weights leaf of `ctx`'s graph that received a gradient.
    pub fn update(&self, ctx: &ComputationContext<'_>) {
        for (variable, weights) in ctx.graph().weights_variables() {
            if let Some(gradient) = ctx.gradient(variable) {
                self.step(weights, gradient.data());
            }
        }
    }

    /// Number of weights with moment state.
    pub fn tracked_weights(&self) -> usize {
        self.state.lock().len()
    }

    fn moments(&self, weights: &Weights) -> Arc<Mutex<Moments>> {
        let mut state = self.state.lock();
        Arc::clone(state.entry(weights.id()).or_default())
    }

    fn step(&self, weights: &Weights, gradient: &[f64]) {
        let moments = self.moments(weights);
        let mut moments = moments.lock();
        if moments.first.len() != gradient.len() {
            moments.first = vec![0.0; gradient.len()];
            moments.second = vec![0.0; gradient.len()];
        }
        moments.step += 1;

        let bias_correction1 = 1.0 - self.beta1.powi(moments.step);
        let bias_correction2 = 1.0 - self.beta2.powi(moments.step);
        let Moments { first, second, .. } = &mut *moments;

        weights.update(|tensor| {
            for (i, value) in tensor.data_mut().iter_mut().enumerate() {
                let g = gradient[i];
                first[i] = self.beta1 * first[i] + (1.0 - self.beta1) * g;
                second[i] = self.beta2 * second[i] + (1.0 - self.beta2) * g * g;

                let m_hat = first[i] / bias_correction1;
                let v_hat = second[i] / bias_correction2;
                *value -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        });
    }
}
