//! Per-example audit reports.
//!
//! Read-only. A report lists every term of an example with its table index,
//! value, effective weight and (when adaptive) accumulator, sorted by
//! descending |contribution|.

use std::fmt;

use crate::example::{Example, Origin};
use crate::regularizer::Regularizer;
use crate::weights::WeightStore;

#[derive(Clone, Debug, PartialEq)]
pub struct AuditEntry {
    /// `space^feature`, `a^b^c^d` for pairs, `Constant`, or empty.
    pub name: String,
    /// Slot number in the table (address / stride).
    pub index: usize,
    pub x: f32,
    /// Weight with pending regularization applied.
    pub weight: f32,
    pub accumulator: Option<f32>,
}

impl AuditEntry {
    pub fn contribution(&self) -> f32 {
        self.weight * self.x
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.name.is_empty() {
            write!(f, "{}:", self.name)?;
        }
        write!(f, "{}:{}:{}", self.index, self.x, self.weight)?;
        if let Some(g) = self.accumulator {
            write!(f, "@{g}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditReport {
    pub prediction: f32,
    pub tag: String,
    pub entries: Vec<AuditEntry>,
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prediction)?;
        if !self.tag.is_empty() {
            write!(f, " {}", self.tag)?;
        }
        for entry in &self.entries {
            write!(f, "\t{entry}")?;
        }
        Ok(())
    }
}

/// Build the report for `example` against the current table.
pub fn report(
    store: &WeightStore,
    example: &Example,
    pairs: &[(u8, u8)],
    regularizer: &Regularizer,
    adaptive: bool,
) -> AuditReport {
    let stride = store.stride();
    let constant = store.addressing().address(crate::weights::CONSTANT);
    let mut entries = Vec::with_capacity(example.num_features());

    example.for_each_term(store.addressing(), pairs, |term| {
        let slot = store.slot(term.address);
        let name = match term.origin {
            Origin::Linear { namespace, position } => {
                match example.namespace(namespace).and_then(|ns| ns.names()) {
                    Some(names) => {
                        let n = &names[position];
                        format!("{}^{}", n.space, n.feature)
                    }
                    None if term.address == constant => "Constant".to_owned(),
                    None => String::new(),
                }
            }
            Origin::Pair { first, second } => {
                let a = example.namespace(first.0).and_then(|ns| ns.names());
                let b = example.namespace(second.0).and_then(|ns| ns.names());
                match (a, b) {
                    (Some(a), Some(b)) => {
                        let (a, b) = (&a[first.1], &b[second.1]);
                        format!("{}^{}^{}^{}", a.space, a.feature, b.space, b.feature)
                    }
                    _ => String::new(),
                }
            }
        };
        entries.push(AuditEntry {
            name,
            index: term.address / stride,
            x: term.x,
            weight: regularizer.effective(slot[0]),
            accumulator: adaptive.then(|| slot[1]),
        });
    });

    entries.sort_by(|a, b| b.contribution().abs().total_cmp(&a.contribution().abs()));
    AuditReport {
        prediction: example.prediction,
        tag: example.tag.clone(),
        entries,
    }
}
