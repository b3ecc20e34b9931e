//! Collection of generic internal data types that are used widely.

#[macro_use]
mod macros;

pub mod buf;
pub mod exec;
pub mod payload;

pub mod prelude;
