// battery and charger control core for an esp32c3 wearable
//
// Host-testable: everything except board/ is plain no_std logic behind
// the ChargerHal seam. The `board` feature adds the esp32c3 binding.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "board")]
pub mod board;
pub mod charger;
pub mod config;
pub mod drivers;
pub mod events;
pub mod hal;
pub mod kernel;

#[cfg(test)]
pub(crate) mod testing;
