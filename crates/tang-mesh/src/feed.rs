//! Channel-backed example source.
//!
//! Producers push [`Item`]s from any thread; the learner polls without
//! blocking. The feed is exhausted once every sender is gone and the buffer
//! has drained.

use tokio::sync::mpsc::{self, error::TryRecvError};

use tang_online::{ExampleSource, Item};

pub struct Feed {
    rx: mpsc::Receiver<Item>,
    exhausted: bool,
}

impl Feed {
    /// A bounded feed and its producer half.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Item>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                rx,
                exhausted: false,
            },
        )
    }
}

impl ExampleSource for Feed {
    fn try_next(&mut self) -> Option<Item> {
        if self.exhausted {
            return None;
        }
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.exhausted = true;
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
