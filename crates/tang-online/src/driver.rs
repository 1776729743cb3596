//! The loop that feeds a learner from an example source.

use tracing::info;

use crate::error::LearnerError;
use crate::example::{Example, Item};
use crate::learner::Learner;

/// Non-blocking source of items.
///
/// `try_next` returns `None` both when nothing is ready yet and when the
/// source is done; `is_exhausted` tells the two apart.
pub trait ExampleSource {
    fn try_next(&mut self) -> Option<Item>;
    fn is_exhausted(&self) -> bool;
}

/// In-memory source replaying a fixed set of examples for several passes.
///
/// Each replayed example is stamped with its pass number and classified with
/// [`Item::from_example`].
#[derive(Clone, Debug)]
pub struct Replay {
    examples: Vec<Example>,
    passes: u64,
    pass: u64,
    cursor: usize,
}

impl Replay {
    pub fn new(examples: Vec<Example>, passes: u64) -> Self {
        Self {
            examples,
            passes,
            pass: 0,
            cursor: 0,
        }
    }

    pub fn once(examples: Vec<Example>) -> Self {
        Self::new(examples, 1)
    }
}

impl ExampleSource for Replay {
    fn try_next(&mut self) -> Option<Item> {
        if self.is_exhausted() {
            return None;
        }
        let mut example = self.examples[self.cursor].clone();
        example.pass = self.pass;
        self.cursor += 1;
        if self.cursor == self.examples.len() {
            self.cursor = 0;
            self.pass += 1;
        }
        Some(Item::from_example(example))
    }

    fn is_exhausted(&self) -> bool {
        self.examples.is_empty() || self.pass >= self.passes
    }
}

/// What a [`drive`] run did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub examples: u64,
    pub commands: u64,
    pub passes: u64,
    pub average_loss: f64,
}

/// Train on everything `source` yields, then finish the run.
///
/// Spins while the source has nothing ready. On exhaustion the learner
/// materializes and averages one last time, and the final model is saved
/// under the configured checkpoint name if a sink is attached.
pub fn drive<S: ExampleSource + ?Sized>(
    learner: &mut Learner,
    source: &mut S,
) -> Result<RunSummary, LearnerError> {
    let mut summary = RunSummary::default();
    loop {
        if let Some(mut item) = source.try_next() {
            match item {
                Item::Train(_) => summary.examples += 1,
                Item::Checkpoint { .. } => summary.commands += 1,
            }
            learner.process(&mut item)?;
        } else if source.is_exhausted() {
            break;
        } else {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    learner.finish()?;
    let name = learner.config().checkpoint_name.clone();
    learner.save(&name, None)?;

    summary.passes = learner.current_pass() + 1;
    summary.average_loss = learner.stats().average_loss();
    info!(
        examples = summary.examples,
        passes = summary.passes,
        average_loss = summary.average_loss,
        "run finished"
    );
    Ok(summary)
}
