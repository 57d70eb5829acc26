//! FerroDB Concurrency
//!
//! The process-wide lock manager and its per-operation client:
//!
//! - [`LockManager`] arbitrates multi-mode access to named resources
//!   with FIFO-with-priority granting and starvation avoidance
//! - [`Locker`] aggregates one operation's acquisitions, enforces the
//!   hierarchical protocol, and draws admission tickets
//! - [`DeadlockDetector`] walks the wait-for graph on behalf of a
//!   stalled waiter
//! - [`TicketPool`] bounds the number of concurrently active readers
//!   and writers independently of lock fairness
//!
//! The long-lived collaborators ([`LockManager`], [`TicketHolders`],
//! [`PartitionedLockStats`]) are bundled into a [`ConcurrencyContext`]
//! that is passed to every [`Locker`] at construction; nothing in this
//! crate reaches for a global singleton.

pub mod deadlock;
pub mod locker;
pub mod manager;
pub mod mode;
pub mod notify;
pub mod request;
pub mod resource;
pub mod stats;
pub mod ticket;

pub use deadlock::DeadlockDetector;
pub use locker::{ClientState, ConcurrencyContext, LockError, LockSnapshot, Locker, TicketHolders};
pub use manager::{LockHeadInfo, LockManager, LockRequestInfo};
pub use mode::LockMode;
pub use notify::LockGrantNotification;
pub use request::{LockRequest, LockRequestStatus, LockResult};
pub use resource::{ResourceId, ResourceType};
pub use stats::{LockStats, LockStatsSnapshot, PartitionedLockStats};
pub use ticket::TicketPool;
