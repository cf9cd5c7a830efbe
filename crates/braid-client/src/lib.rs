//! Headless client core: the state every chat view owns, independent of any
//! rendering layer.
//!
//! Three pieces: a per-view cache of pre-issued signed ids
//! ([`ids::IdCache`]), the message tree with branch selection
//! ([`tree::MessageTree`]), and the view controller that reconciles local
//! optimistic state against the persisted store and in-flight streams
//! ([`controller::ChatViewController`]).
//!
//! None of this state is shared across views. Each tab owns its controller
//! and its id cache and replenishes independently.

pub mod controller;
pub mod ids;
pub mod tree;

pub use controller::{ChatStatus, ChatViewController};
pub use ids::{IdCache, IdCacheError, SignedIdFetcher};
pub use tree::{BranchSelections, MessageTree};
