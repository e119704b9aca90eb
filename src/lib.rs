// Lightning network client core library
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    //missing_docs
)]

//! Core of a lightning network client: BOLT peer messages and their wire
//! codec, the Sphinx onion engine for payments and onion messages, the
//! interactive transaction construction and splice state machines, the
//! gossip-fed routing graph with pathfinding and multi-path payments,
//! BOLT-12 offer negotiation, on-chain resolution of channel transactions
//! and submarine swap scripts.
//!
//! Transport (noise + framing), the on-chain wallet, persistent storage and
//! any UI are external collaborators consumed through the interfaces in
//! [`api`]. The core itself is runtime-free: every protocol step is a
//! synchronous state transition over owned state, and the embedding
//! application decides how to schedule peers and chain ingestion.

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

pub extern crate ln_wire as wire;

pub mod api;
pub mod bolt12;
pub mod channel;
pub mod crypto;
pub mod onchain;
pub mod p2p;
pub mod router;
pub mod sphinx;
pub mod swap;

pub use p2p::Messages;
