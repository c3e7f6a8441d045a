use super::{Tag, Transport};
use crate::config;
use crate::warnings::RuntimeWarning;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use std::time::{Duration, Instant};

type Envelope = (Tag, Vec<u8>);

/// One rank of a world whose ranks are threads of this process. Every
/// ordered pair of ranks has its own channel, so messages between two ranks
/// arrive in the order they were sent.
pub struct ThreadTransport {
    rank: usize,
    outgoing: Vec<Sender<Envelope>>, //indexed by destination
    incoming: Vec<Receiver<Envelope>>, //indexed by source
    timeout: Duration,
}

impl std::fmt::Debug for ThreadTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadTransport({}/{})", self.rank, self.outgoing.len())
    }
}

impl ThreadTransport {
    /// The connected ranks `0..size`, in rank order.
    pub fn world(size: usize) -> Vec<ThreadTransport> {
        crate::bug_on!(size == 0, "a world needs at least one rank");
        let timeout = Duration::from_secs_f64(config().deadlock_timeout.max(0.001));
        let mut senders: Vec<Vec<Sender<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Envelope>>> = (0..size).map(|_| Vec::new()).collect();
        for src in 0..size {
            for dst in 0..size {
                let (s, r) = unbounded();
                senders[src].push(s);
                receivers[dst].push(r);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| ThreadTransport {
                rank,
                outgoing,
                incoming,
                timeout,
            })
            .collect()
    }

    /// Interval after which a blocked receive warns about a potential
    /// deadlock. It keeps waiting afterwards.
    pub fn with_timeout(mut self, timeout: Duration) -> ThreadTransport {
        self.timeout = timeout;
        self
    }
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outgoing.len()
    }

    fn send(&self, dest: usize, tag: Tag, data: Vec<u8>) {
        if self.outgoing[dest].send((tag, data)).is_err() {
            crate::bug!("rank {} left the world before rank {} was done", dest, self.rank);
        }
    }

    fn recv(&self, source: usize, tag: Tag) -> Vec<u8> {
        let start = Instant::now();
        loop {
            match self.incoming[source].recv_timeout(self.timeout) {
                Ok((received, data)) => {
                    crate::bug_on!(
                        received != tag,
                        "rank {} expected a {:?} message from rank {} but got {:?}",
                        self.rank,
                        tag,
                        source,
                        received
                    );
                    return data;
                }
                Err(RecvTimeoutError::Timeout) => RuntimeWarning::CollectiveTimeout(
                    self.rank,
                    source,
                    start.elapsed().as_secs_f64(),
                )
                .print(),
                Err(RecvTimeoutError::Disconnected) => {
                    crate::bug!("rank {} left the world while rank {} waits for it", source, self.rank)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_fifo() {
        let world = ThreadTransport::world(2);
        for i in 0..10u8 {
            world[0].send(1, Tag::PointToPoint, vec![i]);
        }
        world[1].send(0, Tag::Collective, vec![42]);
        for i in 0..10u8 {
            assert_eq!(world[1].recv(0, Tag::PointToPoint), vec![i]);
        }
        assert_eq!(world[0].recv(1, Tag::Collective), vec![42]);
    }

    #[test]
    fn slow_peer_only_warns() {
        let mut world = ThreadTransport::world(2).into_iter();
        let waiting = world.next().unwrap().with_timeout(Duration::from_millis(5));
        let slow = world.next().unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                slow.send(0, Tag::Collective, vec![1, 2, 3]);
            });
            assert_eq!(waiting.recv(1, Tag::Collective), vec![1, 2, 3]);
        });
    }

    #[test]
    #[should_panic(expected = "expected a Collective message")]
    fn diverged_ranks_are_a_bug() {
        let world = ThreadTransport::world(2);
        world[0].send(1, Tag::PointToPoint, vec![]);
        world[1].recv(0, Tag::Collective);
    }
}
