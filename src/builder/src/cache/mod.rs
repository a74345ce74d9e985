//! Layer cache.
//!
//! `LayerCache` memoizes populated layer roots by a hash of each layer's
//! declared inputs, so an unchanged layer is never populated twice.

pub mod layer_cache;

pub use layer_cache::{CacheEntry, LayerCache};
