#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use cfg_if::cfg_if;

mod bucket;
mod overflow;

pub mod map;

pub use map::Entry;
pub use map::HopscotchMap;

cfg_if! {
    if #[cfg(feature = "std")] {
        /// The default hasher builder.
        ///
        /// With the `std` feature this is `RandomState`, giving every map
        /// its own random keys. Without `std` it falls back to a
        /// deterministically keyed SipHash-1-3, which is not resistant to
        /// hash flooding; supply your own builder if that matters.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    } else {
        /// The default hasher builder.
        ///
        /// With the `std` feature this is `RandomState`, giving every map
        /// its own random keys. Without `std` it falls back to a
        /// deterministically keyed SipHash-1-3, which is not resistant to
        /// hash flooding; supply your own builder if that matters.
        pub type DefaultHashBuilder = core::hash::BuildHasherDefault<siphasher::sip::SipHasher13>;
    }
}
