//! Background quadtree update
//!
//! The quadtree and the frame's chunk list are moved into a rayon task and
//! handed back on join, so nothing else can touch them while it runs. The
//! join blocks on a std channel, so it is safe inside an async runtime.

use std::panic::AssertUnwindSafe;
use std::sync::mpsc;

use crate::core::types::DVec2;
use crate::quadtree::QuadTree;
use crate::render::buffer::GpuTerrainChunk;

/// What a finished job hands back
pub struct UpdateOutput {
    pub tree: QuadTree,
    pub chunks: Vec<GpuTerrainChunk>,
}

/// Why a job produced no output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    Panicked(String),
    /// The task was dropped without reporting
    Lost,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Panicked(msg) => write!(f, "quadtree update panicked: {}", msg),
            JobFailure::Lost => write!(f, "quadtree update was dropped"),
        }
    }
}

pub struct QuadTreeJob {
    result: mpsc::Receiver<Result<UpdateOutput, JobFailure>>,
}

impl QuadTreeJob {
    /// Update LODs for `camera` and rebuild the chunk list in the background
    pub fn spawn(tree: QuadTree, chunks: Vec<GpuTerrainChunk>, camera: DVec2) -> Self {
        Self::spawn_with(tree, chunks, move |tree, chunks| {
            tree.check_update(camera);
            tree.push_draw_request(chunks);
        })
    }

    pub fn spawn_with<F>(mut tree: QuadTree, mut chunks: Vec<GpuTerrainChunk>, work: F) -> Self
    where
        F: FnOnce(&mut QuadTree, &mut Vec<GpuTerrainChunk>) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        rayon::spawn(move || {
            // A panic escaping a rayon task aborts the process
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
                work(&mut tree, &mut chunks);
                UpdateOutput { tree, chunks }
            }));
            let result = outcome.map_err(|payload| JobFailure::Panicked(panic_message(payload.as_ref())));
            // Receiver gone means the terrain stopped waiting
            let _ = tx.send(result);
        });
        Self { result: rx }
    }

    /// Block until the job reports
    pub fn join(self) -> Result<UpdateOutput, JobFailure> {
        self.result.recv().unwrap_or(Err(JobFailure::Lost))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TerrainConfig;
    use crate::streaming::TerrainMetadata;
    use std::sync::Arc;

    fn tree() -> QuadTree {
        let config = TerrainConfig::default();
        let metadata = Arc::new(TerrainMetadata::new(config.lod_count()));
        QuadTree::new(&config, metadata)
    }

    #[test]
    fn test_job_returns_tree_and_chunks() {
        let job = QuadTreeJob::spawn(tree(), Vec::with_capacity(16), DVec2::new(5000.0, 5000.0));
        let output = job.join().unwrap();
        // First update loads only the root
        assert_eq!(output.chunks.len(), 1);
        assert_eq!(output.tree.events().len(), 1);
        assert!(output.chunks.capacity() >= 16);
    }

    #[test]
    fn test_panic_is_reported() {
        let job = QuadTreeJob::spawn_with(tree(), Vec::new(), |_, _| panic!("boom"));
        assert_eq!(job.join().err(), Some(JobFailure::Panicked("boom".into())));
    }

    #[test]
    fn test_join_inside_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = runtime.enter();
        let job = QuadTreeJob::spawn(tree(), Vec::new(), DVec2::new(5000.0, 5000.0));
        assert_eq!(job.join().unwrap().chunks.len(), 1);
    }

    #[test]
    fn test_dropped_sender_is_lost() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(tx);
        let job = QuadTreeJob { result: rx };
        assert_eq!(job.join().err(), Some(JobFailure::Lost));
    }
}
