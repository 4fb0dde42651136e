//! Backend membership and dialing.

mod address_set;
mod dialer;

pub use address_set::AddressSet;
pub use dialer::{DialError, Dialer};
