//! Fixed-size groups of worker threads.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};

use super::communicator::{Communicator, Endpoints};
use super::CollectiveError;

/// A fixed number of symmetric workers, formed once and never resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    size: usize,
    timeout: Option<Duration>,
}

/// Outcome of [`ProcessGroup::run_rooted`].
#[derive(Debug)]
pub struct RootedResults<R, T> {
    /// What the root worker returned.
    pub root: Result<R, CollectiveError>,
    /// `(rank, result)` for every other worker, in rank order.
    pub others: Vec<(usize, Result<T, CollectiveError>)>,
}

impl ProcessGroup {
    /// Form a group of `size` workers with unbounded collective waits.
    pub fn new(size: usize) -> Result<Self, CollectiveError> {
        if size == 0 {
            return Err(CollectiveError::EmptyGroup);
        }
        Ok(Self {
            size,
            timeout: None,
        })
    }

    /// Bound every collective wait by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wire up one communicator per rank, in rank order.
    pub fn communicators<M>(&self) -> Vec<Communicator<M>> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.size).map(|_| unbounded()).unzip();
        let (alive, watchers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| bounded::<()>(0)).unzip();

        receivers
            .into_iter()
            .zip(alive)
            .enumerate()
            .map(|(rank, (inbox, alive))| {
                let peers = senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect();
                let peer_alive = watchers
                    .iter()
                    .enumerate()
                    .map(|(peer, rx)| (peer != rank).then(|| rx.clone()))
                    .collect();
                let endpoints = Endpoints {
                    inbox,
                    peers,
                    alive,
                    peer_alive,
                };
                Communicator::new(rank, endpoints, self.timeout)
            })
            .collect()
    }

    /// Run `work` on every rank concurrently and wait for all of them.
    ///
    /// Results come back in rank order. A worker that panics is reported as
    /// [`CollectiveError::WorkerPanicked`]; its peers see it as disconnected.
    pub fn run<M, T, F>(&self, work: F) -> Vec<Result<T, CollectiveError>>
    where
        M: Send,
        T: Send,
        F: Fn(Communicator<M>) -> T + Sync,
    {
        let communicators = self.communicators::<M>();
        let work = &work;

        thread::scope(|scope| {
            let handles: Vec<_> = communicators
                .into_iter()
                .map(|comm| {
                    let rank = comm.rank();
                    (rank, scope.spawn(move || work(comm)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| CollectiveError::WorkerPanicked { rank })
                })
                .collect()
        })
    }

    /// Run `lead` on rank `root` and `follow` on every other rank.
    ///
    /// The root's result is kept apart from the rest, so callers never have
    /// to pick it out of a list.
    pub fn run_rooted<M, R, T, L, F>(
        &self,
        root: usize,
        lead: L,
        follow: F,
    ) -> Result<RootedResults<R, T>, CollectiveError>
    where
        M: Send,
        R: Send,
        T: Send,
        L: FnOnce(Communicator<M>) -> R + Send,
        F: Fn(Communicator<M>) -> T + Sync,
    {
        if root >= self.size {
            return Err(CollectiveError::InvalidRoot {
                root,
                size: self.size,
            });
        }

        let mut communicators = self.communicators::<M>();
        let lead_comm = communicators.remove(root);
        let follow = &follow;

        Ok(thread::scope(|scope| {
            let lead_handle = scope.spawn(move || lead(lead_comm));
            let handles: Vec<_> = communicators
                .into_iter()
                .map(|comm| {
                    let rank = comm.rank();
                    (rank, scope.spawn(move || follow(comm)))
                })
                .collect();

            let others = handles
                .into_iter()
                .map(|(rank, handle)| {
                    let joined = handle
                        .join()
                        .map_err(|_| CollectiveError::WorkerPanicked { rank });
                    (rank, joined)
                })
                .collect();
            let root_result = lead_handle
                .join()
                .map_err(|_| CollectiveError::WorkerPanicked { rank: root });

            RootedResults {
                root: root_result,
                others,
            }
        }))
    }
}
