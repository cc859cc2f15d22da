#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]

//! Board glue for running a [`dallas::Reader`] on real hardware: a bus built
//! from one open-drain GPIO, and an embassy task that pumps the interpreter
//! for boards that do not give it a timer interrupt of its own.
//!
//! ```ignore
//! static READER: StaticCell<Reader<PinBus<Flex<'static>, Delay>>> = StaticCell::new();
//!
//! #[embassy_executor::task]
//! async fn one_wire(reader: &'static Reader<PinBus<Flex<'static>, Delay>>) -> ! {
//!     pump_loop(reader).await
//! }
//! ```

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod pin_bus;
pub mod pump;

pub use pin_bus::PinBus;
pub use pump::{holdoff_duration, pump_loop, wait_for_idle};
