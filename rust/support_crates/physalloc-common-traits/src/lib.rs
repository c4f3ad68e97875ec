//! Traits and definitions shared by physical memory producers and consumers.
//!
//! # Modules
//!
//! - [`phys_memory`]: Traits describing physically backed memory regions and
//!   the narrow physical address query used by device-programming code

pub mod phys_memory;
