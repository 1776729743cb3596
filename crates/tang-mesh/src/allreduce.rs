//! AllReduce: weight-vector aggregation across workers.
//!
//! Star topology: a coordinator task gathers one contribution per member,
//! sums them in rank order and sends the result back to every member.
//! Members are plain threads; they block on the reply.

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tang_online::{AllReduce, LearnerError};

use crate::error::MeshError;
use crate::mesh::NodeId;

/// Element-wise sum of `buffers` in the order given. All must have the same
/// length.
fn sum_in_order(buffers: &[Vec<f32>]) -> Result<Vec<f32>, MeshError> {
    let Some(first) = buffers.first() else {
        return Ok(Vec::new());
    };
    let len = first.len();
    if let Some(bad) = buffers.iter().find(|b| b.len() != len) {
        return Err(MeshError::SizeMismatch {
            expected: len,
            got: bad.len(),
        });
    }

    let mut result = vec![0.0f32; len];
    for buffer in buffers {
        for (r, v) in result.iter_mut().zip(buffer) {
            *r += v;
        }
    }
    Ok(result)
}

struct Contribution {
    node: NodeId,
    buffer: Vec<f32>,
    reply: oneshot::Sender<Result<Vec<f32>, MeshError>>,
}

enum Message {
    Contribute(Contribution),
    Leave(NodeId),
}

/// A fixed-size group of workers summing buffers together.
///
/// Every member must contribute to every round; a round completes once all
/// `size` members have contributed. When any member leaves, pending and
/// future rounds fail with [`MeshError::GroupClosed`].
pub struct AllReduceGroup {
    endpoint: String,
    size: usize,
    tx: mpsc::UnboundedSender<Message>,
}

impl AllReduceGroup {
    /// Start the coordinator on `runtime`.
    pub fn spawn(endpoint: impl Into<String>, size: usize, runtime: &Handle) -> Result<Self, MeshError> {
        if size == 0 {
            return Err(MeshError::NoWorkers);
        }
        let endpoint = endpoint.into();
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(coordinate(endpoint.clone(), size, rx));
        debug!(%endpoint, size, "reduction group started");
        Ok(Self { endpoint, size, tx })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Handle for the worker ranked `node`.
    pub fn member(&self, node: NodeId) -> GroupMember {
        GroupMember {
            node,
            tx: self.tx.clone(),
        }
    }
}

async fn coordinate(endpoint: String, size: usize, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut pending: Vec<Contribution> = Vec::with_capacity(size);
    let mut closed = false;
    let mut rounds = 0u64;

    while let Some(message) = rx.recv().await {
        match message {
            Message::Contribute(c) if closed => {
                let _ = c.reply.send(Err(MeshError::GroupClosed));
            }
            Message::Contribute(c) => {
                pending.push(c);
                if pending.len() < size {
                    continue;
                }
                pending.sort_by_key(|c| c.node);
                let buffers: Vec<Vec<f32>> = pending
                    .iter_mut()
                    .map(|c| std::mem::take(&mut c.buffer))
                    .collect();
                let outcome = sum_in_order(&buffers);
                rounds += 1;
                debug!(%endpoint, round = rounds, ok = outcome.is_ok(), "round reduced");
                for c in pending.drain(..) {
                    let _ = c.reply.send(replicate(&outcome));
                }
            }
            Message::Leave(node) => {
                if !closed && !pending.is_empty() {
                    warn!(%endpoint, %node, waiting = pending.len(), "member left mid-round");
                }
                closed = true;
                for c in pending.drain(..) {
                    let _ = c.reply.send(Err(MeshError::GroupClosed));
                }
            }
        }
    }
    debug!(%endpoint, rounds, "reduction group finished");
}

/// One copy of a round's outcome per member.
fn replicate(outcome: &Result<Vec<f32>, MeshError>) -> Result<Vec<f32>, MeshError> {
    match outcome {
        Ok(sum) => Ok(sum.clone()),
        Err(MeshError::SizeMismatch { expected, got }) => Err(MeshError::SizeMismatch {
            expected: *expected,
            got: *got,
        }),
        Err(_) => Err(MeshError::GroupClosed),
    }
}

/// One worker's handle on an [`AllReduceGroup`].
///
/// [`sum`](AllReduce::sum) blocks the calling thread, so it must not be
/// called from inside the group's runtime. Dropping the member leaves the
/// group.
pub struct GroupMember {
    node: NodeId,
    tx: mpsc::UnboundedSender<Message>,
}

impl GroupMember {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl AllReduce for GroupMember {
    fn sum(&mut self, buffer: &mut [f32]) -> Result<(), LearnerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Contribute(Contribution {
                node: self.node,
                buffer: buffer.to_vec(),
                reply,
            }))
            .map_err(|_| MeshError::GroupClosed)?;
        let summed = rx.blocking_recv().map_err(|_| MeshError::GroupClosed)??;
        if summed.len() != buffer.len() {
            return Err(MeshError::SizeMismatch {
                expected: buffer.len(),
                got: summed.len(),
            }
            .into());
        }
        buffer.copy_from_slice(&summed);
        Ok(())
    }
}

impl Drop for GroupMember {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Leave(self.node));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_element_wise() {
        let buffers = vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0, 5.0]];
        assert_eq!(sum_in_order(&buffers).unwrap(), vec![4.0, 6.0, 8.0]);
    }

    #[test]
    fn nothing_to_sum() {
        assert!(sum_in_order(&[]).unwrap().is_empty());
    }

    #[test]
    fn single_buffer_is_returned_as_is() {
        let buffers = vec![vec![1.0, 2.0, 3.0]];
        assert_eq!(sum_in_order(&buffers).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn mismatched_lengths() {
        let buffers = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            sum_in_order(&buffers),
            Err(MeshError::SizeMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn group_sums_across_threads() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let group = AllReduceGroup::spawn("test", 3, rt.handle()).unwrap();
        let results: Vec<Vec<f32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..3u32)
                .map(|i| {
                    let mut member = group.member(NodeId(i));
                    s.spawn(move || {
                        let mut buf = vec![i as f32, 1.0];
                        member.sum(&mut buf).unwrap();
                        buf
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for buf in results {
            assert_eq!(buf, vec![3.0, 3.0]);
        }
    }

    #[test]
    fn empty_group_is_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(matches!(
            AllReduceGroup::spawn("test", 0, rt.handle()),
            Err(MeshError::NoWorkers)
        ));
    }
}
