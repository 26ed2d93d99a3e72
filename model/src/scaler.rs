// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Standard (z-score) feature scaling, persisted with the model.

/// Per-feature mean and standard deviation. A zero deviation scales as 1
/// so constant columns pass through centered.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl StandardScaler {
    /// A pass-through scaler of the given width.
    #[must_use]
    pub fn identity(width: usize) -> Self {
        StandardScaler {
            mean: vec![0.0; width],
            std: vec![1.0; width],
        }
    }

    /// Fit mean/std over rows. Rows must share a width.
    #[must_use]
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 {
            return StandardScaler::identity(0);
        }
        #[allow(clippy::cast_precision_loss)]
        let n = rows.len() as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (acc, value) in mean.iter_mut().zip(row) {
                *acc += value;
            }
        }
        for acc in &mut mean {
            *acc /= n;
        }
        let mut var = vec![0.0; width];
        for row in rows {
            for ((acc, value), mu) in var.iter_mut().zip(row).zip(&mean) {
                *acc += (value - mu).powi(2);
            }
        }
        let std = var.into_iter().map(|v| (v / n).sqrt()).collect();
        StandardScaler { mean, std }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Transform one vector into z-scores.
    #[must_use]
    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((value, mu), sigma)| {
                let sigma = if *sigma > 0.0 { *sigma } else { 1.0 };
                (value - mu) / sigma
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fit_and_transform() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let scaler = StandardScaler::fit(&rows);
        assert_eq!(scaler.mean, vec![2.0, 10.0]);
        assert_eq!(scaler.std[0], 1.0);
        // constant column: deviation 0 scales as 1, value centers to 0
        let scaled = scaler.transform(&[3.0, 10.0]);
        assert_eq!(scaled, vec![1.0, 0.0]);
    }

    #[test]
    fn identity_passes_through() {
        let scaler = StandardScaler::identity(3);
        assert_eq!(scaler.transform(&[1.5, -2.0, 0.0]), vec![1.5, -2.0, 0.0]);
    }
}
