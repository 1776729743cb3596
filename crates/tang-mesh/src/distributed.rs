//! Data-parallel training: one learner per shard, averaged at pass
//! boundaries.
//!
//! Each shard runs on its own thread with its own [`Learner`]. When the
//! config names a `span_server`, the workers join one [`AllReduceGroup`]
//! and average their tables at every pass boundary and once at the end.
//! Without one, they train independently.

use std::path::PathBuf;

use tracing::{debug, info};

use tang_online::{
    drive, Config, Example, ExampleSource, FileCheckpoint, Learner, ModelState, Replay, RunSummary,
};

use crate::allreduce::{AllReduceGroup, GroupMember};
use crate::error::MeshError;
use crate::mesh::NodeId;

/// What one worker ended with.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    pub node: NodeId,
    pub summary: RunSummary,
    pub state: ModelState,
}

/// Data-parallel run configuration.
pub struct DataParallel {
    config: Config,
    passes: u64,
    checkpoint_dir: Option<PathBuf>,
}

impl DataParallel {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            passes: 1,
            checkpoint_dir: None,
        }
    }

    /// Number of passes over each shard (default: 1).
    pub fn with_passes(mut self, passes: u64) -> Self {
        self.passes = passes;
        self
    }

    /// Give every worker a [`FileCheckpoint`] under `<dir>/<node>`.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Train one worker per shard, replaying each shard for the configured
    /// number of passes.
    ///
    /// Every shard must be non-empty: a worker that sees no examples never
    /// crosses a pass boundary and would leave the others waiting.
    pub fn fit(&self, shards: Vec<Vec<Example>>) -> Result<Vec<WorkerReport>, MeshError> {
        if let Some(i) = shards.iter().position(Vec::is_empty) {
            return Err(MeshError::EmptyShard(NodeId(i as u32)));
        }
        let passes = self.passes;
        self.fit_sources(
            shards
                .into_iter()
                .map(|shard| Replay::new(shard, passes))
                .collect(),
        )
    }

    /// Train one worker per source.
    ///
    /// With a `span_server`, every source must span the same number of
    /// passes.
    pub fn fit_sources<S>(&self, sources: Vec<S>) -> Result<Vec<WorkerReport>, MeshError>
    where
        S: ExampleSource + Send,
    {
        if sources.is_empty() {
            return Err(MeshError::NoWorkers);
        }
        self.config.validate()?;

        let runtime = match self.config.span_server {
            Some(_) => Some(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("tang-mesh-reduce")
                    .enable_all()
                    .build()
                    .map_err(|e| MeshError::Runtime(e.to_string()))?,
            ),
            None => None,
        };
        let group = match (&self.config.span_server, &runtime) {
            (Some(endpoint), Some(rt)) => {
                Some(AllReduceGroup::spawn(endpoint.as_str(), sources.len(), rt.handle())?)
            }
            _ => None,
        };
        info!(
            workers = sources.len(),
            passes = self.passes,
            endpoint = ?self.config.span_server,
            "starting data-parallel run"
        );

        let results: Vec<Result<WorkerReport, MeshError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .into_iter()
                .enumerate()
                .map(|(i, source)| {
                    let node = NodeId(i as u32);
                    let member = group.as_ref().map(|g| g.member(node));
                    let handle = scope.spawn(move || self.run_worker(node, source, member));
                    (node, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(node, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(MeshError::WorkerPanicked(node)))
                })
                .collect()
        });
        drop(group);

        let reports = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        info!(workers = reports.len(), "data-parallel run finished");
        Ok(reports)
    }

    fn run_worker<S: ExampleSource>(
        &self,
        node: NodeId,
        mut source: S,
        member: Option<GroupMember>,
    ) -> Result<WorkerReport, MeshError> {
        let mut learner = Learner::new(self.config.clone())?;
        if let Some(member) = member {
            learner = learner.with_reducer(Box::new(member));
        }
        if let Some(dir) = &self.checkpoint_dir {
            learner = learner.with_checkpoint(Box::new(FileCheckpoint::new(dir.join(node.to_string()))));
        }

        let summary = drive(&mut learner, &mut source)?;
        debug!(%node, examples = summary.examples, average_loss = summary.average_loss, "worker finished");
        Ok(WorkerReport {
            node,
            summary,
            state: learner.model_state(),
        })
    }
}
