//! Events delivered by the stack notifier.

use bitflags::bitflags;

bitflags! {
    /// Stack events the liveness subsystem reacts to. The embedding
    /// forwards its notifier callbacks as a mask of these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: u32 {
        /// The device role changed (detached, child, router).
        const ROLE_CHANGED = 1 << 0;
        /// A child was added to the child table.
        const CHILD_ADDED = 1 << 1;
        /// A child was removed from the child table.
        const CHILD_REMOVED = 1 << 2;
    }
}
