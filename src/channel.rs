//! Channel abstraction between a diff-sync stack and its remote counterpart.

use crate::{error::Result, message::SyncMessage};

/// How a diff-sync stack exchanges protocol messages, independent of the
/// transport underneath.
///
/// Both calls are synchronous and must return quickly: `receive` is invoked
/// from broker delivery callbacks while fanning a message out to local stacks.
#[auto_impl::auto_impl(Box, Arc)]
pub trait Channel: Send + Sync + 'static {
    /// Send a message produced by the local stack towards its peers.
    fn send(&self, message: SyncMessage) -> Result<()>;

    /// Hand a message from a peer to the local stack.
    fn receive(&self, message: SyncMessage) -> Result<()>;
}
