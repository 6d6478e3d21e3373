//! Control structures shared by the effect runtime.
//!
//! - [`Either`]: one of two alternatives, used for race winners and for the
//!   step type of `IO::tail_rec_m`.

mod either;

pub use either::Either;
