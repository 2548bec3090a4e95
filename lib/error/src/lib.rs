//! Unified error definitions for the simulator.
//!
//! Every subsystem declares its error type through [`define_sim_error!`],
//! which assigns a class byte to the enum and a code byte to each variant.
//! The combined 16-bit code (`class << 8 | variant`) gives each error a
//! stable identity across the workspace:
//!
//! - `0x01xx` — MMU / page table driver
//! - `0x02xx` — physical memory manager
//!
//! ```
//! use sim_error::define_sim_error;
//!
//! define_sim_error! {
//!     pub enum DemoError(0x7F) {
//!         Broken = 0x01 => "something broke",
//!     }
//! }
//!
//! assert_eq!(DemoError::Broken.code(), 0x7F01);
//! assert_eq!(DemoError::Broken.to_string(), "something broke");
//! ```

#![cfg_attr(not(test), no_std)]

/// Define an error enum with a subsystem class byte and per-variant codes.
///
/// Generates the enum plus `code()`, `message()`, `Display` and
/// `core::error::Error` implementations.
#[macro_export]
macro_rules! define_sim_error {
    (
        $(#[$outer:meta])*
        $vis:vis enum $name:ident($class:literal) {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $code:literal => $msg:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// Subsystem class byte shared by all variants of this enum.
            pub const CLASS: u8 = $class;

            /// Combined 16-bit error code: `class << 8 | variant code`.
            #[must_use]
            pub const fn code(self) -> u16 {
                ((Self::CLASS as u16) << 8)
                    | match self {
                        $(Self::$variant => $code,)+
                    }
            }

            /// Static description of the error condition.
            #[must_use]
            pub const fn message(self) -> &'static str {
                match self {
                    $(Self::$variant => $msg,)+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.message())
            }
        }

        impl core::error::Error for $name {}
    };
}
