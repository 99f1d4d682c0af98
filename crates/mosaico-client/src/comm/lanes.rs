use crate::ClientError;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type LaneJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One serialization lane: a FIFO queue drained by a single task.
///
/// Jobs submitted to the same lane run strictly in submission order, one at
/// a time. Jobs on different lanes run in parallel. A topic is pinned to one
/// lane for its whole lifetime, which is what preserves its write order.
pub struct WorkerLane {
    queue: mpsc::UnboundedSender<LaneJob>,
}

impl WorkerLane {
    fn spawn() -> (Arc<Self>, JoinHandle<()>) {
        let (queue, mut jobs) = mpsc::unbounded_channel::<LaneJob>();

        let handle = tokio::spawn(async move {
            // One job at a time: the await is what serializes the lane
            while let Some(job) = jobs.recv().await {
                job.await;
            }
        });

        (Arc::new(Self { queue }), handle)
    }

    /// Enqueues a job on this lane.
    pub fn submit(
        &self,
        job: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ClientError> {
        self.queue
            .send(Box::pin(job))
            .map_err(|_| ClientError::LaneClosed)
    }
}

/// A fixed set of worker lanes cycled through with a round-robin cursor.
pub struct WorkerLanePool {
    lanes: Vec<Arc<WorkerLane>>,
    handles: Vec<JoinHandle<()>>,
    cursor: AtomicUsize,
}

impl WorkerLanePool {
    pub fn new(pool_size: usize) -> Result<Self, ClientError> {
        if pool_size < 1 {
            return Err(ClientError::PoolSize("worker lane"));
        }

        debug!("initializing worker lane pool with {pool_size} lanes...");

        let mut lanes = Vec::with_capacity(pool_size);
        let mut handles = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let (lane, handle) = WorkerLane::spawn();
            lanes.push(lane);
            handles.push(handle);
        }

        Ok(Self {
            lanes,
            handles,
            cursor: AtomicUsize::new(0),
        })
    }

    /// The next lane in the rotation.
    pub fn next(&self) -> Result<Arc<WorkerLane>, ClientError> {
        if self.lanes.is_empty() {
            return Err(ClientError::PoolClosed("worker lane"));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.lanes.len();
        Ok(self.lanes[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Drains and shuts every lane down. Queued jobs still run, new
    /// submissions fail with [`ClientError::LaneClosed`].
    pub async fn close(&mut self) {
        self.lanes.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Heuristic pool size: the number of available CPU cores.
    pub fn default_pool_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }
}

impl Drop for WorkerLanePool {
    fn drop(&mut self) {
        // Dropping the queues lets the lane tasks run to completion on
        // whatever is already enqueued
        self.lanes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_on_one_lane_run_in_submission_order() {
        let mut pool = WorkerLanePool::new(1).unwrap();
        let lane = pool.next().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let order = order.clone();
            lane.submit(async move {
                // A small delay on even jobs would reveal reordering
                if i % 2 == 0 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                order.lock().unwrap().push(i);
            })
            .unwrap();
        }

        pool.close().await;

        let order = order.lock().unwrap();
        assert_eq!(*order, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let mut pool = WorkerLanePool::new(2).unwrap();
        let lane = pool.next().unwrap();
        pool.close().await;

        assert!(matches!(pool.next(), Err(ClientError::PoolClosed(_))));
        assert!(matches!(lane.submit(async {}), Err(ClientError::LaneClosed)));
    }

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        assert!(matches!(
            WorkerLanePool::new(0),
            Err(ClientError::PoolSize(_))
        ));
    }
}
