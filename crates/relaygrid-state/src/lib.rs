//! relaygrid-state: the record of what has been durably applied.
//!
//! A pure data component. The state loop writes one snapshot per
//! successful apply; the stats and metrics loops read copies. Nothing
//! here performs I/O.

pub mod store;

pub use store::{StateStore, VERSION_UNSET};
