// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The feed-forward binary network.
//!
//! Topology per hidden layer: linear → batch-norm → ReLU → dropout, then
//! a final linear to a single logit. Batch-norm always evaluates with its
//! running statistics; incremental updates keep them frozen and only move
//! the linear parameters (small online batches cannot produce usable
//! batch statistics).

use rand::Rng;
use rand::rngs::StdRng;

const BN_EPS: f64 = 1e-5;
const PROB_CLAMP: f64 = 1e-7;

#[must_use]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A dense layer: `weights[out][in]` plus a bias per output.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LinearLayer {
    fn initialized(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        // He initialization for the ReLU stack
        #[allow(clippy::cast_precision_loss)]
        let scale = (2.0 / fan_in.max(1) as f64).sqrt();
        let weights = (0..fan_out)
            .map(|_| {
                (0..fan_in)
                    .map(|_| (rng.random::<f64>() * 2.0 - 1.0) * scale)
                    .collect()
            })
            .collect();
        LinearLayer {
            weights,
            bias: vec![0.0; fan_out],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias)
            .collect()
    }

    #[must_use]
    pub fn fan_in(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn fan_out(&self) -> usize {
        self.weights.len()
    }
}

/// Batch-norm parameters, applied in inference form:
/// `y_i = gamma_i * (x_i - mean_i) / sqrt(var_i + eps) + beta_i`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchNorm {
    pub gamma: Vec<f64>,
    pub beta: Vec<f64>,
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
}

impl BatchNorm {
    fn identity(width: usize) -> Self {
        BatchNorm {
            gamma: vec![1.0; width],
            beta: vec![0.0; width],
            running_mean: vec![0.0; width],
            running_var: vec![1.0; width],
        }
    }

    /// The multiplicative factor for channel `i` in inference form.
    fn scale(&self, i: usize) -> f64 {
        self.gamma[i] / (self.running_var[i] + BN_EPS).sqrt()
    }

    fn normalize(&self, z: &[f64]) -> Vec<f64> {
        z.iter()
            .enumerate()
            .map(|(i, value)| self.scale(i) * (value - self.running_mean[i]) + self.beta[i])
            .collect()
    }
}

/// One hidden block: linear + batch-norm. Activation and dropout are
/// applied by the net.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HiddenBlock {
    pub linear: LinearLayer,
    pub norm: BatchNorm,
}

/// The full network.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TabularNet {
    pub input_dim: usize,
    pub hidden_dims: Vec<usize>,
    pub dropout: f64,
    pub blocks: Vec<HiddenBlock>,
    pub output: LinearLayer,
}

/// Per-sample tape recorded by the training forward pass.
struct Tape {
    /// Input to each block (post-dropout activation of the previous one).
    block_inputs: Vec<Vec<f64>>,
    /// Pre-activation (post-norm) of each block.
    normed: Vec<Vec<f64>>,
    /// Dropout keep masks per block (already scaled by 1/keep).
    masks: Vec<Vec<f64>>,
    /// Input to the output layer.
    final_input: Vec<f64>,
    logit: f64,
}

impl TabularNet {
    /// Randomly initialized network (used by tests and model bootstrap).
    #[must_use]
    pub fn initialized(
        input_dim: usize,
        hidden_dims: &[usize],
        dropout: f64,
        rng: &mut StdRng,
    ) -> Self {
        let mut blocks = Vec::with_capacity(hidden_dims.len());
        let mut prev = input_dim;
        for &width in hidden_dims {
            blocks.push(HiddenBlock {
                linear: LinearLayer::initialized(prev, width, rng),
                norm: BatchNorm::identity(width),
            });
            prev = width;
        }
        TabularNet {
            input_dim,
            hidden_dims: hidden_dims.to_vec(),
            dropout,
            blocks,
            output: LinearLayer::initialized(prev, 1, rng),
        }
    }

    /// Deterministic inference logit (no dropout).
    #[must_use]
    pub fn logit(&self, input: &[f64]) -> f64 {
        let mut activation = input.to_vec();
        for block in &self.blocks {
            let z = block.linear.forward(&activation);
            activation = block
                .norm
                .normalize(&z)
                .into_iter()
                .map(|value| value.max(0.0))
                .collect();
        }
        self.output.forward(&activation)[0]
    }

    /// Deterministic inference probability.
    #[must_use]
    pub fn probability(&self, input: &[f64]) -> f64 {
        sigmoid(self.logit(input))
    }

    fn forward_train(&self, input: &[f64], rng: &mut StdRng) -> Tape {
        let keep = (1.0 - self.dropout).max(f64::MIN_POSITIVE);
        let mut block_inputs = Vec::with_capacity(self.blocks.len());
        let mut normed = Vec::with_capacity(self.blocks.len());
        let mut masks = Vec::with_capacity(self.blocks.len());
        let mut activation = input.to_vec();
        for block in &self.blocks {
            block_inputs.push(activation.clone());
            let z = block.linear.forward(&activation);
            let n = block.norm.normalize(&z);
            let mask: Vec<f64> = (0..n.len())
                .map(|_| {
                    if rng.random::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                })
                .collect();
            activation = n
                .iter()
                .zip(&mask)
                .map(|(value, m)| value.max(0.0) * m)
                .collect();
            normed.push(n);
            masks.push(mask);
        }
        let logit = self.output.forward(&activation)[0];
        Tape {
            block_inputs,
            normed,
            masks,
            final_input: activation,
            logit,
        }
    }

    /// One SGD step over a mini-batch with decoupled weight decay.
    /// Returns the mean binary cross-entropy loss over the batch.
    pub(crate) fn sgd_step(
        &mut self,
        batch: &[(&[f64], f64)],
        learning_rate: f64,
        weight_decay: f64,
        rng: &mut StdRng,
        correct: &mut usize,
    ) -> f64 {
        if batch.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let batch_n = batch.len() as f64;

        // gradient accumulators mirroring the linear parameters
        let mut grad_blocks: Vec<(Vec<Vec<f64>>, Vec<f64>)> = self
            .blocks
            .iter()
            .map(|block| {
                (
                    vec![vec![0.0; block.linear.fan_in()]; block.linear.fan_out()],
                    vec![0.0; block.linear.fan_out()],
                )
            })
            .collect();
        let mut grad_out_w = vec![0.0; self.output.fan_in()];
        let mut grad_out_b = 0.0;

        let mut loss_sum = 0.0;
        for (input, label) in batch {
            let tape = self.forward_train(input, rng);
            let prob = sigmoid(tape.logit).clamp(PROB_CLAMP, 1.0 - PROB_CLAMP);
            loss_sum += -(label * prob.ln() + (1.0 - label) * (1.0 - prob).ln());
            if (prob >= 0.5) == (*label >= 0.5) {
                *correct += 1;
            }

            // output layer
            let dlogit = prob - label;
            for (grad, activation) in grad_out_w.iter_mut().zip(&tape.final_input) {
                *grad += dlogit * activation;
            }
            grad_out_b += dlogit;

            // backpropagate through the hidden stack
            let mut upstream: Vec<f64> = self.output.weights[0]
                .iter()
                .map(|weight| weight * dlogit)
                .collect();
            for (index, block) in self.blocks.iter().enumerate().rev() {
                let normed = &tape.normed[index];
                let mask = &tape.masks[index];
                // d/dz through dropout, relu and the frozen norm affine
                let dz: Vec<f64> = upstream
                    .iter()
                    .enumerate()
                    .map(|(i, du)| {
                        let relu_gate = if normed[i] > 0.0 { 1.0 } else { 0.0 };
                        du * mask[i] * relu_gate * block.norm.scale(i)
                    })
                    .collect();
                let (grad_w, grad_b) = &mut grad_blocks[index];
                let block_input = &tape.block_inputs[index];
                for (out_idx, dz_i) in dz.iter().enumerate() {
                    grad_b[out_idx] += dz_i;
                    for (grad, x) in grad_w[out_idx].iter_mut().zip(block_input) {
                        *grad += dz_i * x;
                    }
                }
                if index > 0 {
                    let fan_in = block.linear.fan_in();
                    let mut next = vec![0.0; fan_in];
                    for (out_idx, dz_i) in dz.iter().enumerate() {
                        for (acc, weight) in next.iter_mut().zip(&block.linear.weights[out_idx]) {
                            *acc += dz_i * weight;
                        }
                    }
                    upstream = next;
                }
            }
        }

        // apply averaged gradients with decoupled weight decay
        for (block, (grad_w, grad_b)) in self.blocks.iter_mut().zip(&grad_blocks) {
            for (row, grad_row) in block.linear.weights.iter_mut().zip(grad_w) {
                for (weight, grad) in row.iter_mut().zip(grad_row) {
                    *weight -= learning_rate * (grad / batch_n + weight_decay * *weight);
                }
            }
            for (bias, grad) in block.linear.bias.iter_mut().zip(grad_b) {
                *bias -= learning_rate * grad / batch_n;
            }
        }
        for (weight, grad) in self.output.weights[0].iter_mut().zip(&grad_out_w) {
            *weight -= learning_rate * (grad / batch_n + weight_decay * *weight);
        }
        self.output.bias[0] -= learning_rate * grad_out_b / batch_n;

        loss_sum / batch_n
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn inference_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = TabularNet::initialized(4, &[8, 4], 0.35, &mut rng);
        let x = [0.5, -1.0, 2.0, 0.0];
        assert_eq!(net.logit(&x), net.logit(&x));
        let p = net.probability(&x);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn dimensions_follow_hidden_widths() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = TabularNet::initialized(13, &[32, 16, 8], 0.1, &mut rng);
        assert_eq!(net.blocks.len(), 3);
        assert_eq!(net.blocks[0].linear.fan_in(), 13);
        assert_eq!(net.blocks[0].linear.fan_out(), 32);
        assert_eq!(net.blocks[2].linear.fan_out(), 8);
        assert_eq!(net.output.fan_in(), 8);
        assert_eq!(net.output.fan_out(), 1);
    }

    #[test]
    fn sgd_reduces_loss_on_separable_data() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut net = TabularNet::initialized(2, &[8], 0.0, &mut rng);
        let rows: Vec<(Vec<f64>, f64)> = (0..64)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                (vec![sign * 2.0, sign], f64::from(u8::from(sign > 0.0)))
            })
            .collect();
        let batch: Vec<(&[f64], f64)> = rows
            .iter()
            .map(|(x, y)| (x.as_slice(), *y))
            .collect();
        let mut correct = 0usize;
        let first = net.sgd_step(&batch, 0.5, 0.0, &mut rng, &mut correct);
        let mut last = first;
        for _ in 0..200 {
            let mut c = 0usize;
            last = net.sgd_step(&batch, 0.5, 0.0, &mut rng, &mut c);
        }
        assert!(last < first, "loss should fall: first={first}, last={last}");
    }
}
