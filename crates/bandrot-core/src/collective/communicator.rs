//! Per-worker endpoint for collective operations.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Select, Sender};

use super::{CollectiveError, Operation};

/// A message in flight between two workers.
///
/// `seq` numbers the collective call it belongs to, so a message sent early
/// for the next collective is never mistaken for one of the current call.
#[derive(Debug)]
pub(crate) struct Envelope<M> {
    pub(crate) from: usize,
    pub(crate) seq: u64,
    pub(crate) body: M,
}

/// One worker's handle on its process group.
///
/// Every worker must call the same collectives, with the same root, in the
/// same order. Each call is a rendezvous: receivers block until the data they
/// need has arrived, bounded by the group timeout when one is set.
///
/// Dropping a communicator, including while unwinding from a panic, is seen
/// by every peer waiting on this rank as [`CollectiveError::Disconnected`].
#[derive(Debug)]
pub struct Communicator<M> {
    rank: usize,
    size: usize,
    inbox: Receiver<Envelope<M>>,
    /// Senders indexed by destination rank; our own slot is empty.
    peers: Vec<Option<Sender<Envelope<M>>>>,
    /// Never sent on. Peers see it disconnect when this rank goes away.
    _alive: Sender<()>,
    /// Liveness of each peer, indexed by rank; our own slot is empty.
    peer_alive: Vec<Option<Receiver<()>>>,
    timeout: Option<Duration>,
    next_seq: u64,
    /// Messages that arrived ahead of the collective they belong to.
    parked: Vec<Envelope<M>>,
}

/// Wiring for one rank, built by the process group.
pub(crate) struct Endpoints<M> {
    pub(crate) inbox: Receiver<Envelope<M>>,
    pub(crate) peers: Vec<Option<Sender<Envelope<M>>>>,
    pub(crate) alive: Sender<()>,
    pub(crate) peer_alive: Vec<Option<Receiver<()>>>,
}

impl<M> Communicator<M> {
    pub(crate) fn new(rank: usize, endpoints: Endpoints<M>, timeout: Option<Duration>) -> Self {
        Self {
            rank,
            size: endpoints.peers.len(),
            inbox: endpoints.inbox,
            peers: endpoints.peers,
            _alive: endpoints.alive,
            peer_alive: endpoints.peer_alive,
            timeout,
            next_seq: 0,
            parked: Vec::new(),
        }
    }

    /// This worker's index in `0..size`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers in the group.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Upper bound on each collective's wait, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Send `value` from `root` to every worker.
    ///
    /// The root passes `Some(value)` and gets it back; every other worker
    /// passes `None` and receives its own copy.
    pub fn broadcast(&mut self, root: usize, value: Option<M>) -> Result<M, CollectiveError>
    where
        M: Clone,
    {
        let deadline = self.deadline();
        self.broadcast_until(root, value, deadline)
    }

    /// [`broadcast`](Self::broadcast) where receivers wait for the root
    /// without a deadline.
    ///
    /// For a root that has open-ended work to finish, such as reading its
    /// input, before it can send. The wait still ends with `Disconnected` if
    /// the root goes away.
    pub fn broadcast_untimed(&mut self, root: usize, value: Option<M>) -> Result<M, CollectiveError>
    where
        M: Clone,
    {
        self.broadcast_until(root, value, None)
    }

    fn broadcast_until(
        &mut self,
        root: usize,
        value: Option<M>,
        deadline: Option<Instant>,
    ) -> Result<M, CollectiveError>
    where
        M: Clone,
    {
        let op = Operation::Broadcast;
        self.check_root(root)?;
        let seq = self.begin();

        if self.rank != root {
            return self.recv_from(root, seq, op, deadline);
        }

        let value = value.ok_or(CollectiveError::MissingRootValue {
            rank: self.rank,
            operation: op,
        })?;
        for peer in 0..self.size {
            if peer != root {
                self.send(peer, seq, value.clone(), op)?;
            }
        }
        Ok(value)
    }

    /// Collect one value from every worker at `root`, in rank order.
    ///
    /// Returns `Some` with `size` values at the root and `None` elsewhere.
    pub fn gather(&mut self, root: usize, value: M) -> Result<Option<Vec<M>>, CollectiveError> {
        self.check_root(root)?;
        if self.rank == root {
            return self.gather_here(value).map(Some);
        }

        let seq = self.begin();
        self.send(root, seq, value, Operation::Gather)?;
        Ok(None)
    }

    /// Gather with this worker as the root.
    pub fn gather_here(&mut self, value: M) -> Result<Vec<M>, CollectiveError> {
        let op = Operation::Gather;
        let seq = self.begin();
        let deadline = self.deadline();

        let mut own = Some(value);
        let mut gathered = Vec::with_capacity(self.size);
        for peer in 0..self.size {
            if peer == self.rank {
                gathered.extend(own.take());
            } else {
                gathered.push(self.recv_from(peer, seq, op, deadline)?);
            }
        }
        Ok(gathered)
    }

    fn check_root(&self, root: usize) -> Result<(), CollectiveError> {
        if root < self.size {
            Ok(())
        } else {
            Err(CollectiveError::InvalidRoot {
                root,
                size: self.size,
            })
        }
    }

    fn begin(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    fn send(&self, to: usize, seq: u64, body: M, op: Operation) -> Result<(), CollectiveError> {
        let disconnected = || CollectiveError::Disconnected {
            rank: self.rank,
            peer: to,
            operation: op,
        };
        let sender = self.peers[to].as_ref().ok_or_else(disconnected)?;
        sender
            .send(Envelope {
                from: self.rank,
                seq,
                body,
            })
            .map_err(|_| disconnected())
    }

    fn recv_from(
        &mut self,
        from: usize,
        seq: u64,
        op: Operation,
        deadline: Option<Instant>,
    ) -> Result<M, CollectiveError> {
        if let Some(pos) = self
            .parked
            .iter()
            .position(|e| e.from == from && e.seq == seq)
        {
            return Ok(self.parked.swap_remove(pos).body);
        }

        loop {
            let envelope = self.next_envelope(from, op, deadline)?;
            if envelope.from == from && envelope.seq == seq {
                return Ok(envelope.body);
            }
            self.parked.push(envelope);
        }
    }

    /// Next message from anyone, while `from` is still around to send one.
    fn next_envelope(
        &self,
        from: usize,
        op: Operation,
        deadline: Option<Instant>,
    ) -> Result<Envelope<M>, CollectiveError> {
        let disconnected = CollectiveError::Disconnected {
            rank: self.rank,
            peer: from,
            operation: op,
        };

        let mut select = Select::new();
        let inbox = select.recv(&self.inbox);
        let peer_alive = self.peer_alive[from].as_ref();
        if let Some(alive) = peer_alive {
            select.recv(alive);
        }

        let selected = match deadline {
            Some(deadline) => {
                select
                    .select_deadline(deadline)
                    .map_err(|_| CollectiveError::Timeout {
                        rank: self.rank,
                        peer: from,
                        operation: op,
                        timeout: self.timeout.unwrap_or_default(),
                    })?
            }
            None => select.select(),
        };

        if selected.index() == inbox {
            return selected.recv(&self.inbox).map_err(|_| disconnected);
        }

        // `from` is gone; anything it sent before leaving is already queued
        if let Some(alive) = peer_alive {
            let _ = selected.recv(alive);
        }
        self.inbox.try_recv().map_err(|_| disconnected)
    }
}
