//! Interprocess communication used by unification.
//!
//! A [`Transport`] moves opaque byte messages between ranks. The collectives
//! of [`Ipc`] are built on top of point-to-point messages, so every backend
//! only has to provide ordered, reliable delivery per pair of ranks. Like
//! MPI collectives they block, and every rank has to issue the same
//! collectives in the same order.
pub(crate) mod local;
pub(crate) mod threads;

pub use local::LocalTransport;
pub use threads::ThreadTransport;

use enum_dispatch::enum_dispatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Separates the messages of collectives from user point-to-point traffic,
/// a mismatch means the ranks diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Collective,
    PointToPoint,
}

#[enum_dispatch]
pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Queues `data` for `dest`. Must not wait for the matching receive.
    fn send(&self, dest: usize, tag: Tag, data: Vec<u8>);
    /// Next message from `source`, blocking until one arrives.
    fn recv(&self, source: usize, tag: Tag) -> Vec<u8>;
}

/// A user supplied transport, e.g. a binding to a real MPI library.
pub struct DynTransport(Box<dyn Transport>);

impl Transport for DynTransport {
    fn rank(&self) -> usize {
        self.0.rank()
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn send(&self, dest: usize, tag: Tag, data: Vec<u8>) {
        self.0.send(dest, tag, data)
    }
    fn recv(&self, source: usize, tag: Tag) -> Vec<u8> {
        self.0.recv(source, tag)
    }
}

#[enum_dispatch(Transport)]
pub enum IpcBackend {
    LocalTransport,
    ThreadTransport,
    DynTransport,
}

impl std::fmt::Debug for IpcBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcBackend::LocalTransport(_) => write!(f, "Local"),
            IpcBackend::ThreadTransport(t) => write!(f, "Threads({}/{})", t.rank(), t.size()),
            IpcBackend::DynTransport(t) => write!(f, "Dynamic({}/{})", t.rank(), t.size()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
}

impl ReduceOp {
    fn apply<T: Ord + std::ops::Add<Output = T>>(self, a: T, b: T) -> T {
        match self {
            ReduceOp::Max => a.max(b),
            ReduceOp::Min => a.min(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// Typed collectives over an [`IpcBackend`].
#[derive(Debug)]
pub struct Ipc {
    backend: IpcBackend,
}

impl Default for Ipc {
    fn default() -> Self {
        Ipc::local()
    }
}

impl Ipc {
    pub fn new(backend: impl Into<IpcBackend>) -> Ipc {
        Ipc {
            backend: backend.into(),
        }
    }

    /// A single rank world.
    pub fn local() -> Ipc {
        Ipc::new(LocalTransport)
    }

    /// `size` connected ranks living in this process, e.g. one per thread.
    pub fn threads(size: usize) -> Vec<Ipc> {
        ThreadTransport::world(size).into_iter().map(Ipc::new).collect()
    }

    pub fn custom(transport: impl Transport + 'static) -> Ipc {
        Ipc::new(DynTransport(Box::new(transport)))
    }

    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    pub fn size(&self) -> usize {
        self.backend.size()
    }

    fn check_rank(&self, rank: usize) {
        crate::bug_on!(
            rank >= self.size(),
            "rank {} outside of a world of {}",
            rank,
            self.size()
        );
    }

    fn post<T: Serialize + ?Sized>(&self, dest: usize, tag: Tag, value: &T) {
        self.check_rank(dest);
        match crate::serialize(value) {
            Ok(data) => self.backend.send(dest, tag, data),
            Err(e) => crate::bug!("unable to encode message for rank {}: {}", dest, e),
        }
    }

    fn fetch<T: DeserializeOwned>(&self, source: usize, tag: Tag) -> T {
        self.check_rank(source);
        let data = self.backend.recv(source, tag);
        match crate::deserialize(&data) {
            Ok(value) => value,
            Err(e) => crate::bug!("unable to decode message from rank {}: {}", source, e),
        }
    }

    pub fn send<T: Serialize + ?Sized>(&self, dest: usize, value: &T) {
        tracing::trace!("rank {} send to {}", self.rank(), dest);
        self.post(dest, Tag::PointToPoint, value)
    }

    pub fn recv<T: DeserializeOwned>(&self, source: usize) -> T {
        tracing::trace!("rank {} recv from {}", self.rank(), source);
        self.fetch(source, Tag::PointToPoint)
    }

    /// `value` of `root` on every rank. Only `root` passes `Some`.
    pub fn bcast<T: Serialize + DeserializeOwned>(&self, value: Option<T>, root: usize) -> T {
        self.check_rank(root);
        if self.rank() == root {
            let value = match value {
                Some(value) => value,
                None => crate::bug!("broadcast root {} without a value", root),
            };
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.post(dest, Tag::Collective, &value);
            }
            value
        } else {
            self.fetch(root, Tag::Collective)
        }
    }

    /// Every rank's `value`, in rank order, on `root`.
    pub fn gather<T: Serialize + DeserializeOwned + Clone>(
        &self,
        value: &T,
        root: usize,
    ) -> Option<Vec<T>> {
        self.check_rank(root);
        if self.rank() == root {
            Some(
                (0..self.size())
                    .map(|source| {
                        if source == root {
                            value.clone()
                        } else {
                            self.fetch(source, Tag::Collective)
                        }
                    })
                    .collect(),
            )
        } else {
            self.post(root, Tag::Collective, value);
            None
        }
    }

    /// Gather of differently sized contributions.
    pub fn gatherv<T: Serialize + DeserializeOwned + Clone>(
        &self,
        values: &[T],
        root: usize,
    ) -> Option<Vec<Vec<T>>> {
        self.gather(&values.to_vec(), root)
    }

    pub fn allgather<T: Serialize + DeserializeOwned + Clone>(&self, value: &T) -> Vec<T> {
        let gathered = self.gather(value, 0);
        self.bcast(gathered, 0)
    }

    /// `values[rank]` of `root` on every rank. Only `root` passes `Some`.
    pub fn scatter<T: Serialize + DeserializeOwned>(&self, values: Option<Vec<T>>, root: usize) -> T {
        self.check_rank(root);
        if self.rank() == root {
            let values = match values {
                Some(values) if values.len() == self.size() => values,
                _ => crate::bug!("scatter root needs exactly {} values", self.size()),
            };
            let mut mine = None;
            for (dest, value) in values.into_iter().enumerate() {
                if dest == root {
                    mine = Some(value);
                } else {
                    self.post(dest, Tag::Collective, &value);
                }
            }
            match mine {
                Some(value) => value,
                None => crate::bug!("scatter lost the root's own value"),
            }
        } else {
            self.fetch(root, Tag::Collective)
        }
    }

    /// `op` over every rank's `value`, on `root` only.
    pub fn reduce<T>(&self, value: T, op: ReduceOp, root: usize) -> Option<T>
    where
        T: Serialize + DeserializeOwned + Clone + Ord + std::ops::Add<Output = T>,
    {
        self.gather(&value, root)
            .and_then(|values| values.into_iter().reduce(|a, b| op.apply(a, b)))
    }

    pub fn allreduce<T>(&self, value: T, op: ReduceOp) -> T
    where
        T: Serialize + DeserializeOwned + Clone + Ord + std::ops::Add<Output = T>,
    {
        let reduced = self.reduce(value, op, 0);
        self.bcast(reduced, 0)
    }

    pub fn barrier(&self) {
        let arrived = self.gather(&(), 0);
        self.bcast(arrived.map(|_| ()), 0)
    }
}
