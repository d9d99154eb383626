//! # spanpool-core
//!
//! Allocation-policy logic for the spanpool allocator.
//!
//! This crate holds everything about the allocator that can be expressed
//! without touching memory: the size-class partition, the per-span
//! occupancy bitmap, the batching/retention policy, and the error
//! taxonomy. The `spanpool` crate layers the actual pointer work on top.
//! No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod bitmap;
pub mod error;
pub mod policy;
pub mod size_class;

/// Platform maximum fundamental alignment. Every block address handed out
/// by the allocator is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Virtual-memory page size assumed by every layer.
pub const PAGE_SIZE: usize = 4096;

/// Largest request served through the size-class machinery. Anything
/// bigger goes straight to the page cache.
pub const MAX_BYTES: usize = 256 * 1024;

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(MAX_BYTES % PAGE_SIZE == 0);
