//! Per-peer reassembly state with a global bound.
//!
//! A connectionless peer is identified only by its address, so the registry
//! keeps one [`Reassembler`] per address and caps how many addresses it
//! tracks. When a fragment from a new address is accepted while the registry
//! is full, the address that was least recently active is dropped together
//! with its partial messages.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    hash::Hash,
    num::NonZeroUsize,
    rc::Rc,
    time::Instant,
};

use bytes::Bytes;
use log::debug;

use super::{
    FragmentError,
    FragmentStatus,
    FragmentationError,
    Reassembler,
    ReassemblySink,
    reassembler::check_mtu,
};
use crate::metrics::{PEERS_EVICTED, StatsSink};

/// Address contexts kept before the least recently active one is evicted.
pub const DEFAULT_PEER_CAPACITY: usize = 128;

type ActivityKey = (Instant, u64);

struct Peer<S> {
    reassembler: Reassembler<S>,
    activity: ActivityKey,
}

/// Bounded map from peer address to [`Reassembler`].
///
/// `factory` builds the sink for an address the first time a fragment from
/// it is seen. If that fragment is rejected the new context, sink included,
/// is discarded and the address is not admitted.
pub struct ReassemblyRegistry<A, S, F> {
    mtu: usize,
    num_msgs: NonZeroUsize,
    capacity: NonZeroUsize,
    stats: Rc<dyn StatsSink>,
    factory: F,
    peers: HashMap<A, Peer<S>>,
    activity: BTreeMap<ActivityKey, A>,
    next_seq: u64,
}

impl<A, S, F> ReassemblyRegistry<A, S, F>
where
    A: Clone + Eq + Hash + fmt::Debug,
    S: ReassemblySink,
    F: FnMut(&A) -> S,
{
    /// Create a registry holding at most `capacity` addresses, each with a
    /// reassembler of `num_msgs` streams for fragments of at most `mtu`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::MtuTooSmall`] when `mtu` is below
    /// [`MIN_MTU`](super::MIN_MTU).
    pub fn new(
        mtu: usize,
        num_msgs: NonZeroUsize,
        capacity: NonZeroUsize,
        stats: Rc<dyn StatsSink>,
        factory: F,
    ) -> Result<Self, FragmentationError> {
        check_mtu(mtu)?;
        Ok(Self {
            mtu,
            num_msgs,
            capacity,
            stats,
            factory,
            peers: HashMap::new(),
            activity: BTreeMap::new(),
            next_seq: 0,
        })
    }

    /// Route a fragment from `addr` using the current time.
    ///
    /// # Errors
    ///
    /// See [`ReassemblyRegistry::process_fragment_at`].
    pub fn process_fragment(
        &mut self,
        addr: &A,
        frame: Bytes,
    ) -> Result<FragmentStatus, FragmentError> {
        self.process_fragment_at(addr, frame, Instant::now())
    }

    /// Route a fragment from `addr` to its reassembler, creating one for a
    /// new address. A successfully processed fragment marks `addr` as the
    /// most recently active peer.
    ///
    /// # Errors
    ///
    /// Returns the [`FragmentError`] reported by the reassembler. Rejected
    /// fragments neither refresh nor admit the address.
    pub fn process_fragment_at(
        &mut self,
        addr: &A,
        frame: Bytes,
        now: Instant,
    ) -> Result<FragmentStatus, FragmentError> {
        let key = self.next_key(now);
        if let Some(peer) = self.peers.get_mut(addr) {
            let status = peer.reassembler.process_fragment_at(frame, now)?;
            self.activity.remove(&peer.activity);
            peer.activity = key;
            self.activity.insert(key, addr.clone());
            return Ok(status);
        }

        let sink = (self.factory)(addr);
        let mut reassembler =
            Reassembler::with_checked_mtu(self.mtu, self.num_msgs, Rc::clone(&self.stats), sink);
        let status = reassembler.process_fragment_at(frame, now)?;
        if self.peers.len() >= self.capacity.get() {
            self.evict_oldest();
        }
        self.peers.insert(
            addr.clone(),
            Peer {
                reassembler,
                activity: key,
            },
        );
        self.activity.insert(key, addr.clone());
        Ok(status)
    }

    /// Drop the context for `addr`, returning its reassembler.
    pub fn remove(&mut self, addr: &A) -> Option<Reassembler<S>> {
        let peer = self.peers.remove(addr)?;
        self.activity.remove(&peer.activity);
        Some(peer.reassembler)
    }

    /// Borrow the reassembler for `addr`.
    #[must_use]
    pub fn get(&self, addr: &A) -> Option<&Reassembler<S>> {
        self.peers.get(addr).map(|peer| &peer.reassembler)
    }

    /// Whether `addr` currently has a context.
    #[must_use]
    pub fn contains(&self, addr: &A) -> bool { self.peers.contains_key(addr) }

    /// Number of tracked addresses.
    #[must_use]
    pub fn len(&self) -> usize { self.peers.len() }

    /// Whether no address is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.peers.is_empty() }

    /// Maximum number of tracked addresses.
    #[must_use]
    pub const fn capacity(&self) -> NonZeroUsize { self.capacity }

    fn next_key(&mut self, now: Instant) -> ActivityKey {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        (now, seq)
    }

    fn evict_oldest(&mut self) {
        let Some((_, addr)) = self.activity.pop_first() else {
            return;
        };
        self.peers.remove(&addr);
        self.stats.update(PEERS_EVICTED, 1);
        debug!("evicted reassembly context for {addr:?}");
    }
}

impl<A, S, F> fmt::Debug for ReassemblyRegistry<A, S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReassemblyRegistry")
            .field("mtu", &self.mtu)
            .field("capacity", &self.capacity)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}
