//! Stacked LSTM regressor with a small feed-forward head
//!
//! Mini-batches are processed as `(batch × features)` matrices per time
//! step. Gate weights are fused into one `(4·hidden × input)` matrix in the
//! order input, forget, cell, output. Training is full backpropagation
//! through time with an Adam update.

use ndarray::{s, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Network shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkShape {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub head_size: usize,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    w_x: Array2<f64>,
    w_h: Array2<f64>,
    bias: Array2<f64>,
}

struct LayerCache {
    inputs: Vec<Array2<f64>>,
    gates: Vec<Array2<f64>>,
    cells: Vec<Array2<f64>>,
    tanh_cells: Vec<Array2<f64>>,
    hiddens: Vec<Array2<f64>>,
}

impl LstmLayer {
    fn new(input_size: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let limit = (1.0 / hidden as f64).sqrt();
        let mut bias = Array2::zeros((1, 4 * hidden));
        bias.slice_mut(s![.., hidden..2 * hidden]).fill(1.0);
        Self {
            w_x: uniform((4 * hidden, input_size), limit, rng),
            w_h: uniform((4 * hidden, hidden), limit, rng),
            bias,
        }
    }

    fn hidden(&self) -> usize {
        self.w_h.ncols()
    }

    fn forward(&self, inputs: Vec<Array2<f64>>) -> LayerCache {
        let h = self.hidden();
        let batch = inputs.first().map(|x| x.nrows()).unwrap_or(0);
        let mut cache = LayerCache {
            gates: Vec::with_capacity(inputs.len()),
            cells: Vec::with_capacity(inputs.len()),
            tanh_cells: Vec::with_capacity(inputs.len()),
            hiddens: Vec::with_capacity(inputs.len()),
            inputs,
        };
        let mut h_prev = Array2::<f64>::zeros((batch, h));
        let mut c_prev = Array2::<f64>::zeros((batch, h));

        for x in &cache.inputs {
            let mut gates = x.dot(&self.w_x.t()) + h_prev.dot(&self.w_h.t());
            gates += &self.bias;
            gates.slice_mut(s![.., 0..2 * h]).mapv_inplace(sigmoid);
            gates.slice_mut(s![.., 2 * h..3 * h]).mapv_inplace(f64::tanh);
            gates.slice_mut(s![.., 3 * h..]).mapv_inplace(sigmoid);

            let (i, f, g, o) = split_gates(gates.view(), h);
            let c = &f * &c_prev + &i * &g;
            let tc = c.mapv(f64::tanh);
            let h_cur = &o * &tc;

            cache.gates.push(gates.clone());
            cache.cells.push(c.clone());
            cache.tanh_cells.push(tc);
            cache.hiddens.push(h_cur.clone());
            h_prev = h_cur;
            c_prev = c;
        }
        cache
    }

    /// Returns `[dW_x, dW_h, db]` and the gradient for each input step
    fn backward(
        &self,
        cache: &LayerCache,
        dh_out: &[Array2<f64>],
    ) -> ([Array2<f64>; 3], Vec<Array2<f64>>) {
        let h = self.hidden();
        let steps = cache.inputs.len();
        let batch = cache.inputs.first().map(|x| x.nrows()).unwrap_or(0);

        let mut dw_x = Array2::<f64>::zeros(self.w_x.raw_dim());
        let mut dw_h = Array2::<f64>::zeros(self.w_h.raw_dim());
        let mut db = Array2::<f64>::zeros(self.bias.raw_dim());
        let mut dx = vec![Array2::<f64>::zeros((0, 0)); steps];
        let zeros = Array2::<f64>::zeros((batch, h));
        let mut dh_next = zeros.clone();
        let mut dc_next = zeros.clone();

        for t in (0..steps).rev() {
            let dh = &dh_out[t] + &dh_next;
            let (i, f, g, o) = split_gates(cache.gates[t].view(), h);
            let tc = &cache.tanh_cells[t];
            let c_prev = if t > 0 { &cache.cells[t - 1] } else { &zeros };
            let h_prev = if t > 0 { &cache.hiddens[t - 1] } else { &zeros };

            let d_o = &dh * tc;
            let dc = &dc_next + &(&dh * &o * &tc.mapv(|v| 1.0 - v * v));
            let d_i = &dc * &g;
            let d_f = &dc * c_prev;
            let d_g = &dc * &i;
            dc_next = &dc * &f;

            let mut dz = Array2::<f64>::zeros((batch, 4 * h));
            dz.slice_mut(s![.., 0..h])
                .assign(&(&d_i * &i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![.., h..2 * h])
                .assign(&(&d_f * &f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![.., 2 * h..3 * h])
                .assign(&(&d_g * &g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![.., 3 * h..])
                .assign(&(&d_o * &o.mapv(|v| v * (1.0 - v))));

            dw_x += &dz.t().dot(&cache.inputs[t]);
            dw_h += &dz.t().dot(h_prev);
            db += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));
            dx[t] = dz.dot(&self.w_x);
            dh_next = dz.dot(&self.w_h);
        }
        ([dw_x, dw_h, db], dx)
    }
}

#[derive(Debug, Clone)]
struct Head {
    w1: Array2<f64>,
    b1: Array2<f64>,
    w2: Array2<f64>,
    b2: Array2<f64>,
}

impl Head {
    fn new(hidden: usize, head: usize, rng: &mut StdRng) -> Self {
        let l1 = (1.0 / hidden as f64).sqrt();
        let l2 = (1.0 / head as f64).sqrt();
        Self {
            w1: uniform((head, hidden), l1, rng),
            b1: uniform((1, head), l1, rng),
            w2: uniform((1, head), l2, rng),
            b2: uniform((1, 1), l2, rng),
        }
    }

    /// Returns pre-activation of the hidden layer and the output
    fn forward(&self, last: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let mut pre = last.dot(&self.w1.t());
        pre += &self.b1;
        let mut out = pre.mapv(relu).dot(&self.w2.t());
        out += &self.b2;
        (pre, out)
    }
}

/// Stacked LSTM + `Linear(hidden→head) → ReLU → Linear(head→1)`
#[derive(Debug, Clone)]
pub struct LstmNetwork {
    layers: Vec<LstmLayer>,
    head: Head,
}

impl LstmNetwork {
    pub fn new(shape: NetworkShape, rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(shape.num_layers);
        for l in 0..shape.num_layers.max(1) {
            let input = if l == 0 { shape.input_size } else { shape.hidden_size };
            layers.push(LstmLayer::new(input, shape.hidden_size, rng));
        }
        Self {
            layers,
            head: Head::new(shape.hidden_size, shape.head_size, rng),
        }
    }

    /// Inference over one batch; `steps[t]` is `(batch × input_size)`
    pub fn predict(&self, steps: Vec<Array2<f64>>) -> Array2<f64> {
        let mut inputs = steps;
        for layer in &self.layers {
            inputs = layer.forward(inputs).hiddens;
        }
        let last = inputs.last().cloned().unwrap_or_else(|| Array2::zeros((0, 0)));
        self.head.forward(&last).1
    }

    /// One Adam step on a batch; returns the batch MSE before the update
    pub fn train_step(
        &mut self,
        steps: Vec<Array2<f64>>,
        targets: &Array2<f64>,
        optimizer: &mut Adam,
        dropout: f64,
        rng: &mut StdRng,
    ) -> f64 {
        let batch = targets.nrows().max(1) as f64;
        let keep = 1.0 - dropout;

        // forward, masking every layer's output except the last
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut masks: Vec<Vec<Array2<f64>>> = Vec::with_capacity(self.layers.len());
        let mut inputs = steps;
        for (l, layer) in self.layers.iter().enumerate() {
            let cache = layer.forward(inputs);
            let is_last = l + 1 == self.layers.len();
            if is_last || dropout <= 0.0 {
                inputs = cache.hiddens.clone();
                masks.push(Vec::new());
            } else {
                let layer_masks: Vec<Array2<f64>> = cache
                    .hiddens
                    .iter()
                    .map(|h| h.mapv(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 }))
                    .collect();
                inputs = cache
                    .hiddens
                    .iter()
                    .zip(&layer_masks)
                    .map(|(h, m)| h * m)
                    .collect();
                masks.push(layer_masks);
            }
            caches.push(cache);
        }

        let last = inputs.last().cloned().unwrap_or_else(|| Array2::zeros((0, 0)));
        let (pre, out) = self.head.forward(&last);
        let diff = &out - targets;
        let loss = diff.mapv(|d| d * d).sum() / batch;

        // head
        let d_out = diff * (2.0 / batch);
        let act = pre.mapv(relu);
        let dw2 = d_out.t().dot(&act);
        let db2 = d_out.sum_axis(Axis(0)).insert_axis(Axis(0));
        let d_pre = d_out.dot(&self.head.w2) * &pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let dw1 = d_pre.t().dot(&last);
        let db1 = d_pre.sum_axis(Axis(0)).insert_axis(Axis(0));
        let d_last = d_pre.dot(&self.head.w1);

        // layers, top down
        let steps_len = last_len(&caches);
        let mut dh_out: Vec<Array2<f64>> = (0..steps_len)
            .map(|t| {
                if t + 1 == steps_len {
                    d_last.clone()
                } else {
                    Array2::zeros(d_last.raw_dim())
                }
            })
            .collect();
        let mut layer_grads = Vec::with_capacity(self.layers.len());
        for l in (0..self.layers.len()).rev() {
            let (grads, dx) = self.layers[l].backward(&caches[l], &dh_out);
            layer_grads.push(grads);
            if l > 0 {
                let below_masks = &masks[l - 1];
                dh_out = if below_masks.is_empty() {
                    dx
                } else {
                    dx.iter().zip(below_masks).map(|(d, m)| d * m).collect()
                };
            }
        }
        layer_grads.reverse();

        let mut grads: Vec<Array2<f64>> = layer_grads.into_iter().flatten().collect();
        grads.extend([dw1, db1, dw2, db2]);
        optimizer.step(self.params_mut(), &grads);
        loss
    }

    fn params_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut params = Vec::with_capacity(self.layers.len() * 3 + 4);
        for layer in &mut self.layers {
            params.push(&mut layer.w_x);
            params.push(&mut layer.w_h);
            params.push(&mut layer.bias);
        }
        params.push(&mut self.head.w1);
        params.push(&mut self.head.b1);
        params.push(&mut self.head.w2);
        params.push(&mut self.head.b2);
        params
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.w_x.len() + l.w_h.len() + l.bias.len())
            .sum::<usize>()
            + self.head.w1.len()
            + self.head.b1.len()
            + self.head.w2.len()
            + self.head.b2.len()
    }
}

/// Adam optimiser state
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    step: i32,
    m: Vec<Array2<f64>>,
    v: Vec<Array2<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    fn step(&mut self, params: Vec<&mut Array2<f64>>, grads: &[Array2<f64>]) {
        if self.m.is_empty() {
            self.m = grads.iter().map(|g| Array2::zeros(g.raw_dim())).collect();
            self.v = grads.iter().map(|g| Array2::zeros(g.raw_dim())).collect();
        }
        self.step += 1;
        let correction1 = 1.0 - ADAM_BETA1.powi(self.step);
        let correction2 = 1.0 - ADAM_BETA2.powi(self.step);
        let lr = self.learning_rate;

        for (((param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            ndarray::Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                    *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                    let m_hat = *m / correction1;
                    let v_hat = *v / correction2;
                    *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
                });
        }
    }
}

fn last_len(caches: &[LayerCache]) -> usize {
    caches.last().map(|c| c.hiddens.len()).unwrap_or(0)
}

fn split_gates(
    gates: ArrayView2<'_, f64>,
    h: usize,
) -> (ArrayView2<'_, f64>, ArrayView2<'_, f64>, ArrayView2<'_, f64>, ArrayView2<'_, f64>) {
    (
        gates.slice_move(s![.., 0..h]),
        gates.slice_move(s![.., h..2 * h]),
        gates.slice_move(s![.., 2 * h..3 * h]),
        gates.slice_move(s![.., 3 * h..4 * h]),
    )
}

fn uniform(shape: (usize, usize), limit: f64, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_fn(shape, |_| rng.gen_range(-limit..=limit))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}
