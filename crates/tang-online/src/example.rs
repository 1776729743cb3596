//! Examples, namespaces and the term traversal shared by every kernel pass.
//!
//! An [`Example`] arrives from the ingestion boundary already hashed. The
//! learner visits its terms (linear features, then the configured namespace
//! pairs) through [`Example::for_each_term`], the only place that computes
//! weight-table addresses. Prediction, normalization, update and audit all go
//! through it, so they agree on both order and addressing.

use tracing::warn;

use crate::checkpoint::valid_name;
use crate::weights::{Addressing, CONSTANT, CONSTANT_NAMESPACE};

/// One hashed feature. `index` is the raw hash; striding is the store's job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feature {
    pub x: f32,
    pub index: u64,
}

/// Human-readable identity of a feature, for audit output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditName {
    pub space: String,
    pub feature: String,
}

impl AuditName {
    pub fn new(space: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            feature: feature.into(),
        }
    }
}

/// The features of one namespace, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Namespace {
    id: u8,
    features: Vec<Feature>,
    names: Vec<AuditName>,
    sum_sq: f32,
}

impl Namespace {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Audit names, either empty or parallel to [`features`](Self::features).
    pub fn names(&self) -> Option<&[AuditName]> {
        if self.names.len() == self.features.len() && !self.names.is_empty() {
            Some(&self.names)
        } else {
            None
        }
    }

    /// Sum of squared feature values.
    pub fn sum_sq(&self) -> f32 {
        self.sum_sq
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Where a term came from. Positions index into [`Namespace::features`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Linear { namespace: u8, position: usize },
    Pair {
        first: (u8, usize),
        second: (u8, usize),
    },
}

/// A single weighted term of the dot product.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Term {
    /// Start of the owning slot in the weight store.
    pub address: usize,
    /// Raw (unstrided) index the address was derived from.
    pub index: u64,
    pub x: f32,
    pub origin: Origin,
}

/// A hashed, labeled (or unlabeled) training example.
#[derive(Clone, Debug, PartialEq)]
pub struct Example {
    namespaces: Vec<Namespace>,
    /// `None` marks an unlabeled example.
    pub label: Option<f32>,
    pub importance: f32,
    /// Starting prediction. Falls back to the loss's initial value when unset.
    pub initial: Option<f32>,
    pub pass: u64,
    pub tag: String,

    /// Set by the learner.
    pub example_t: f32,
    pub partial_prediction: f32,
    pub prediction: f32,
    pub loss: f32,
    pub eta_round: f32,
    pub revert_weight: f32,
}

impl Default for Example {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            label: None,
            importance: 1.0,
            initial: None,
            pass: 0,
            tag: String::new(),
            example_t: 0.0,
            partial_prediction: 0.0,
            prediction: 0.0,
            loss: 0.0,
            eta_round: 0.0,
            revert_weight: 0.0,
        }
    }
}

impl Example {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labeled(label: f32) -> Self {
        Self::new().with_label(label)
    }

    pub fn with_label(mut self, label: f32) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_initial(mut self, initial: f32) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_pass(mut self, pass: u64) -> Self {
        self.pass = pass;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Builder form of [`push`](Self::push).
    pub fn feature(mut self, namespace: u8, index: u64, x: f32) -> Self {
        self.push(namespace, index, x);
        self
    }

    /// Builder form of [`push_named`](Self::push_named).
    pub fn named_feature(mut self, namespace: u8, index: u64, x: f32, name: AuditName) -> Self {
        self.push_named(namespace, index, x, name);
        self
    }

    /// Add the constant (bias) feature.
    pub fn with_constant(mut self) -> Self {
        self.push(CONSTANT_NAMESPACE, CONSTANT, 1.0);
        self
    }

    /// Append a feature. Zero values are dropped.
    pub fn push(&mut self, namespace: u8, index: u64, x: f32) {
        if x == 0.0 {
            return;
        }
        let ns = self.namespace_mut(namespace);
        ns.features.push(Feature { x, index });
        ns.sum_sq += x * x;
    }

    /// Append a feature with its audit name. Zero values are dropped.
    pub fn push_named(&mut self, namespace: u8, index: u64, x: f32, name: AuditName) {
        if x == 0.0 {
            return;
        }
        let ns = self.namespace_mut(namespace);
        ns.features.push(Feature { x, index });
        ns.names.push(name);
        ns.sum_sq += x * x;
    }

    fn namespace_mut(&mut self, id: u8) -> &mut Namespace {
        let pos = match self.namespaces.iter().position(|ns| ns.id == id) {
            Some(pos) => pos,
            None => {
                self.namespaces.push(Namespace {
                    id,
                    ..Namespace::default()
                });
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[pos]
    }

    /// Namespaces in the order they were first populated.
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn namespace(&self, id: u8) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.id == id)
    }

    pub fn num_features(&self) -> usize {
        self.namespaces.iter().map(Namespace::len).sum()
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }

    /// Σx² over linear features plus, for each pair, the product of the two
    /// namespaces' Σx².
    pub fn sum_feat_sq(&self, pairs: &[(u8, u8)]) -> f32 {
        let linear: f32 = self.namespaces.iter().map(Namespace::sum_sq).sum();
        let quadratic: f32 = pairs
            .iter()
            .filter_map(|&(a, b)| Some(self.namespace(a)?.sum_sq * self.namespace(b)?.sum_sq))
            .sum();
        linear + quadratic
    }

    /// Visit every term: linear features namespace by namespace, then the
    /// cross terms of each pair in `pairs` order.
    ///
    /// Every kernel pass goes through here. Two passes over the same example
    /// with the same `pairs` see the same terms at the same addresses in the
    /// same order.
    pub fn for_each_term<F: FnMut(Term)>(&self, addressing: Addressing, pairs: &[(u8, u8)], mut f: F) {
        for ns in &self.namespaces {
            for (position, feat) in ns.features.iter().enumerate() {
                f(Term {
                    address: addressing.address(feat.index),
                    index: feat.index,
                    x: feat.x,
                    origin: Origin::Linear {
                        namespace: ns.id,
                        position,
                    },
                });
            }
        }
        for &(a, b) in pairs {
            let (Some(first), Some(second)) = (self.namespace(a), self.namespace(b)) else {
                continue;
            };
            for (i, outer) in first.features.iter().enumerate() {
                for (j, inner) in second.features.iter().enumerate() {
                    let x = outer.x * inner.x;
                    // underflow would leave a slot with a zero range
                    if x == 0.0 {
                        continue;
                    }
                    let index = Addressing::quadratic(outer.index, inner.index);
                    f(Term {
                        address: addressing.address(index),
                        index,
                        x,
                        origin: Origin::Pair {
                            first: (a, i),
                            second: (b, j),
                        },
                    });
                }
            }
        }
    }
}

/// What the ingestion boundary hands the learner.
///
/// Control traffic is resolved into [`Item::Checkpoint`] before it reaches the
/// kernel, so training never inspects tags.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Train(Example),
    /// Write a checkpoint. `None` uses the configured default name.
    Checkpoint { name: Option<String>, pass: u64 },
}

impl Item {
    /// Classify a raw example.
    ///
    /// A tag starting with `save` on an example with at most one namespace is
    /// a checkpoint request. `save_<name>` names the checkpoint; anything
    /// shorter or malformed (`save`, `save_`, `saveX`, `save_a/b`) falls back
    /// to the default name.
    pub fn from_example(example: Example) -> Self {
        if example.namespaces.len() > 1 || !example.tag.starts_with("save") {
            return Self::Train(example);
        }
        let name = match example.tag.strip_prefix("save_") {
            Some(name) if valid_name(name) => Some(name.to_owned()),
            Some(name) if !name.is_empty() => {
                warn!(name, "unusable checkpoint name, saving under the default");
                None
            }
            _ => None,
        };
        Self::Checkpoint {
            name,
            pass: example.pass,
        }
    }

    pub fn pass(&self) -> u64 {
        match self {
            Self::Train(ex) => ex.pass,
            Self::Checkpoint { pass, .. } => *pass,
        }
    }
}
