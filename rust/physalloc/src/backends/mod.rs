//! Backends shipped with the allocator.

pub mod pinned;

pub use pinned::{AddressTranslation, PinnedPageBackend, PinnedPageBackendBuilder};

use crate::backend::PhysMemBackend;

/// A backend without any implementation.
///
/// Every operation fails with the contract's defaults. Useful as a placeholder
/// until a device backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredBackend;

impl PhysMemBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }
}
