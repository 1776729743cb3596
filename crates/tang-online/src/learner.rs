//! The online learner: one example at a time through predict, norm, update.

use tracing::{debug, info, warn};

use crate::audit::{self, AuditReport};
use crate::checkpoint::{Checkpoint, ModelState, MODEL_VERSION};
use crate::config::{Config, KernelParams};
use crate::error::LearnerError;
use crate::example::{Example, Item};
use crate::fastmath::fast_pow;
use crate::loss::Loss;
use crate::norm::Normalizer;
use crate::pass::{PassBoundary, PassController};
use crate::predict::{dot, finalize_prediction, Predictor};
use crate::reduce::{self, AllReduce};
use crate::regularizer::Regularizer;
use crate::stats::{LabelRange, SharedData};
use crate::update::apply_update;
use crate::weights::WeightStore;

/// Below this magnitude a step does not feed lazy regularization.
const STEP_EPSILON: f32 = 1e-8;

/// Owns the weight table and every piece of per-run state.
///
/// Strictly sequential: each example is predicted, scored and applied before
/// the next. Cross-worker traffic happens only inside [`sync`](Self::sync),
/// which blocks until the group has averaged.
pub struct Learner {
    config: Config,
    params: KernelParams,
    loss: Box<dyn Loss>,
    weights: WeightStore,
    regularizer: Regularizer,
    normalizer: Normalizer,
    passes: PassController,
    range: LabelRange,
    stats: SharedData,
    eta: f32,
    reducer: Option<Box<dyn AllReduce>>,
    checkpoint: Option<Box<dyn Checkpoint>>,
    last_audit: Option<AuditReport>,
}

impl Learner {
    pub fn new(config: Config) -> Result<Self, LearnerError> {
        config.validate()?;
        let loss = config.loss.build();
        let range = match (loss.fixed_range(), config.min_prediction, config.max_prediction) {
            (_, Some(min), Some(max)) => LabelRange::fixed(min, max),
            (Some((lo, hi)), min, max) => LabelRange::fixed(min.unwrap_or(lo), max.unwrap_or(hi)),
            (None, Some(min), None) => LabelRange::at_least(min),
            (None, None, Some(max)) => LabelRange::at_most(max),
            (None, None, None) => LabelRange::default(),
        };
        Ok(Self {
            params: config.kernel(),
            weights: WeightStore::new(config.num_bits, config.stride()),
            regularizer: Regularizer::new(config.reg_mode, config.l1_lambda, config.l2_lambda),
            normalizer: Normalizer::new(),
            passes: PassController::new(),
            stats: SharedData::new(config.initial_t),
            eta: config.eta,
            range,
            loss,
            config,
            reducer: None,
            checkpoint: None,
            last_audit: None,
        })
    }

    /// Join a reduction group. Only used when `span_server` is configured.
    pub fn with_reducer(mut self, reducer: Box<dyn AllReduce>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Box<dyn Checkpoint>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn weights(&self) -> &WeightStore {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut WeightStore {
        &mut self.weights
    }

    pub fn regularizer(&self) -> &Regularizer {
        &self.regularizer
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn stats(&self) -> &SharedData {
        &self.stats
    }

    pub fn range(&self) -> &LabelRange {
        &self.range
    }

    pub fn eta(&self) -> f32 {
        self.eta
    }

    pub fn current_pass(&self) -> u64 {
        self.passes.current()
    }

    pub fn last_audit(&self) -> Option<&AuditReport> {
        self.last_audit.as_ref()
    }

    /// Handle one item from the ingestion boundary.
    pub fn process(&mut self, item: &mut Item) -> Result<(), LearnerError> {
        self.enter_pass(item.pass())?;
        match item {
            Item::Train(example) => {
                self.learn_example(example);
                Ok(())
            }
            Item::Checkpoint { name, .. } => {
                let name = name.clone().unwrap_or_else(|| self.config.checkpoint_name.clone());
                self.save(&name, None)
            }
        }
    }

    /// Predict on `example` and, if it is labeled and training is on, learn
    /// from it. Pass boundaries are handled first.
    pub fn learn(&mut self, example: &mut Example) -> Result<(), LearnerError> {
        self.enter_pass(example.pass)?;
        self.learn_example(example);
        Ok(())
    }

    /// Prediction with the current model, without touching any state.
    ///
    /// Pending L2 contraction scales the learned dot product only, never the
    /// starting value.
    pub fn predict_only(&self, example: &Example) -> f32 {
        let gravity = self.regularizer.truncates().then(|| self.regularizer.gravity());
        let raw = dot(&self.weights, example, &self.config.pairs, gravity);
        let start = example.initial.unwrap_or_else(|| self.loss.initial());
        finalize_prediction(start + self.regularizer.contraction() * raw, &self.range).0
    }

    fn enter_pass(&mut self, pass: u64) -> Result<(), LearnerError> {
        match self.passes.observe(pass) {
            Some(boundary) => self.cross_pass(boundary),
            None => Ok(()),
        }
    }

    /// Average, materialize, optionally save, then decay and advance.
    fn cross_pass(&mut self, boundary: PassBoundary) -> Result<(), LearnerError> {
        self.sync()?;
        self.sync_weights();
        if self.config.save_per_pass {
            let name = self.config.checkpoint_name.clone();
            self.save(&name, Some(boundary.from))?;
        }
        self.passes
            .complete(boundary, &mut self.eta, self.config.eta_decay_rate);
        info!(from = boundary.from, to = boundary.to, eta = self.eta, "pass boundary");
        Ok(())
    }

    /// End of stream: materialize, then one last average.
    pub fn finish(&mut self) -> Result<(), LearnerError> {
        self.sync_weights();
        self.sync()
    }

    /// Fold pending regularization into the table.
    pub fn sync_weights(&mut self) {
        self.regularizer.materialize(&mut self.weights);
    }

    /// Average with the reduction group. A no-op without `span_server`.
    pub fn sync(&mut self) -> Result<(), LearnerError> {
        let Some(endpoint) = self.config.span_server.as_deref() else {
            return Ok(());
        };
        let Some(reducer) = self.reducer.as_deref_mut() else {
            return Err(LearnerError::Config(format!(
                "span_server {endpoint:?} configured but no reducer attached"
            )));
        };
        if self.config.adaptive {
            let idx = self.config.normalized_updates.then_some(self.params.normalized_idx);
            reduce::weighted_average(reducer, &mut self.weights, idx)?;
        } else {
            reduce::average(reducer, &mut self.weights)?;
        }
        debug!(endpoint, adaptive = self.config.adaptive, "weights averaged");
        Ok(())
    }

    /// Snapshot of the table with pending regularization applied. Does not
    /// mutate the learner.
    pub fn model_state(&self) -> ModelState {
        let mut weights = self.weights.as_slice().to_vec();
        if !self.regularizer.is_neutral() && self.regularizer.is_active() {
            for slot in weights.chunks_exact_mut(self.weights.stride()) {
                slot[0] = self.regularizer.effective(slot[0]);
            }
        }
        ModelState {
            version: MODEL_VERSION,
            num_bits: self.weights.num_bits(),
            stride: self.weights.stride() as u32,
            eta: self.eta,
            pass: self.passes.current(),
            weights,
        }
    }

    /// Reinstall a snapshot taken with the same table shape.
    pub fn restore(&mut self, state: ModelState) -> Result<(), LearnerError> {
        if state.version != MODEL_VERSION {
            return Err(LearnerError::Checkpoint(format!(
                "model version {} is not {MODEL_VERSION}",
                state.version
            )));
        }
        if state.num_bits != self.weights.num_bits() || state.stride as usize != self.weights.stride() {
            return Err(LearnerError::Config(format!(
                "model has {} bits with stride {}, learner has {} bits with stride {}",
                state.num_bits,
                state.stride,
                self.weights.num_bits(),
                self.weights.stride()
            )));
        }
        self.weights = WeightStore::from_cells(state.num_bits, state.stride as usize, state.weights)?;
        self.regularizer = Regularizer::new(
            self.config.reg_mode,
            self.config.l1_lambda,
            self.config.l2_lambda,
        );
        self.eta = state.eta;
        self.passes.reset(state.pass);
        Ok(())
    }

    /// Write a snapshot if a checkpoint sink is attached.
    pub fn save(&mut self, name: &str, pass: Option<u64>) -> Result<(), LearnerError> {
        let state = self.model_state();
        let Some(sink) = self.checkpoint.as_deref_mut() else {
            debug!(name, "no checkpoint sink attached, skipping save");
            return Ok(());
        };
        info!(name, ?pass, "saving regressor to {name}");
        sink.save(&state, name, pass)?;
        self.stats.checkpoints += 1;
        Ok(())
    }

    fn learn_example(&mut self, ex: &mut Example) {
        let pairs = self.config.pairs.as_slice();
        ex.example_t = self.stats.begin(ex.label, ex.importance);
        let t = if self.config.active_learning && self.stats.weighted_unlabeled > 0.0 {
            self.stats.weighted_unlabeled as f32
        } else {
            ex.example_t
        };
        if let Some(label) = ex.label {
            self.range.observe(label);
        }

        let rescale = self.config.training && ex.label.is_some() && ex.importance > 0.0;
        let predictor = Predictor::select(&self.params, self.regularizer.truncates(), rescale);
        let raw = predictor.predict(
            &mut self.weights,
            ex,
            pairs,
            &self.params,
            self.regularizer.gravity(),
        );
        // contraction applies to `raw` alone; `start` is not a learned weight
        let start = ex.initial.unwrap_or_else(|| self.loss.initial());
        ex.partial_prediction = start + raw;
        let (prediction, nan) =
            finalize_prediction(start + self.regularizer.contraction() * raw, &self.range);
        if nan {
            self.stats.nan_predictions += 1;
            warn!(tag = %ex.tag, "NaN prediction replaced by 0");
        }
        ex.prediction = prediction;
        ex.loss = 0.0;
        ex.eta_round = 0.0;
        ex.revert_weight = 0.0;

        let mut norm = 0.0;
        if let Some(label) = ex.label {
            ex.loss = self.loss.loss(&self.range, prediction, label) * ex.importance;
            if self.config.training && ex.loss > 0.0 {
                norm = if self.config.adaptive || self.config.normalized_updates {
                    let g = self.loss.square_grad(prediction, label) * ex.importance;
                    self.normalizer
                        .compute(&mut self.weights, ex, pairs, &self.params, g, ex.importance, t)
                } else {
                    ex.sum_feat_sq(pairs)
                };
                if norm > 0.0 {
                    let mut eta_t = self.eta * norm * ex.importance;
                    if !self.config.adaptive {
                        eta_t *= fast_pow(t, -self.config.power_t);
                    }
                    let update = if self.config.invariant_updates {
                        self.loss.update(prediction, label, eta_t, norm)
                    } else {
                        self.loss.unsafe_update(prediction, label, eta_t, norm)
                    };
                    ex.eta_round = update / self.regularizer.contraction();
                } else {
                    warn!(tag = %ex.tag, "zero norm, skipping update");
                }
            }
        } else if self.config.active_learning {
            let eta_t = self.eta / fast_pow(t, self.config.power_t);
            ex.revert_weight = self.loss.reverting_weight(&self.range, prediction, eta_t);
        }

        if self.config.audit {
            let report = audit::report(&self.weights, ex, pairs, &self.regularizer, self.config.adaptive);
            info!(target: "tang_online::audit", "{report}");
            self.last_audit = Some(report);
        }
        self.stats
            .finish(ex.label, ex.importance, ex.loss, ex.num_features());

        if ex.eta_round != 0.0 {
            if self.regularizer.is_active() && ex.eta_round.abs() > STEP_EPSILON {
                if let Some(label) = ex.label {
                    let derivative = self.loss.first_derivative(&self.range, prediction, label);
                    self.regularizer.accumulate(ex.eta_round, derivative, norm);
                }
            }
            let avg_norm = if self.config.normalized_updates {
                self.normalizer.average_norm(t)
            } else {
                1.0
            };
            apply_update(&mut self.weights, ex, pairs, &self.params, ex.eta_round, avg_norm);
            if self.regularizer.needs_early_materialize() {
                debug!(contraction = self.regularizer.contraction(), "materializing regularization early");
                self.sync_weights();
            }
        }
    }
}
