//! The two strategies for converging the local proxy onto a desired
//! snapshot: live mutation through the admin API, or patching the
//! config file under an advisory lock and reloading the service.
//! One strategy is chosen at startup and never mixed with the other.

pub mod applier;
pub mod error;
pub mod file;
pub mod live;
pub mod lock;

pub use applier::Applier;
pub use error::ApplyError;
pub use file::ConfigPatchApplier;
pub use live::LiveApplier;
pub use lock::FileLock;
