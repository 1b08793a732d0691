//! Per-column min-max scaling

/// Min-max scaler fit on a set of rows
///
/// Constant columns map to 0 and invert back to their constant.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxScaler {
    min: Vec<f64>,
    range: Vec<f64>,
}

impl MinMaxScaler {
    /// Fit on row-major data of the given width
    pub fn fit<'a>(rows: impl IntoIterator<Item = &'a [f64]>, width: usize) -> Self {
        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for row in rows {
            for (c, v) in row.iter().enumerate().take(width) {
                min[c] = min[c].min(*v);
                max[c] = max[c].max(*v);
            }
        }
        let range = min
            .iter()
            .zip(&max)
            .map(|(lo, hi)| {
                let r = hi - lo;
                if r.is_finite() && r > 0.0 {
                    r
                } else {
                    1.0
                }
            })
            .collect();
        let min = min
            .into_iter()
            .map(|m| if m.is_finite() { m } else { 0.0 })
            .collect();
        Self { min, range }
    }

    pub fn width(&self) -> usize {
        self.min.len()
    }

    pub fn transform_value(&self, column: usize, value: f64) -> f64 {
        (value - self.min[column]) / self.range[column]
    }

    pub fn inverse_value(&self, column: usize, scaled: f64) -> f64 {
        scaled * self.range[column] + self.min[column]
    }

    /// Scale a row in place
    pub fn transform_row(&self, row: &mut [f64]) {
        for (c, v) in row.iter_mut().enumerate() {
            *v = self.transform_value(c, *v);
        }
    }
}
