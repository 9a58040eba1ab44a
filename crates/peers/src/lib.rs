//! The peer-selection substrate: peer identity and liveness, the
//! transport-side peer registry, and the peer lists and chooser policies
//! that back outbound dispatch.
//!
//! Peers belong to a transport; lists retain and release them through a
//! [`PeerProvider`] and select among the available ones per call through
//! a [`Chooser`] policy.

mod bind;
mod chooser;
mod direct;
mod innocence;
mod list;
mod peer;
mod pending;
mod registry;
mod roundrobin;
mod single;
mod tworandom;

pub use bind::{Bound, FixedPeers, Updater};
pub use chooser::Chooser;
pub use direct::Direct;
pub use innocence::{Innocence, Probe};
pub use list::{CallPermit, List, ListOptions};
pub use peer::{Peer, PeerId, PeerProvider, Status, Subscriber};
pub use pending::FewestPending;
pub use registry::Registry;
pub use roundrobin::RoundRobin;
pub use single::Single;
pub use tworandom::TwoRandomChoices;
