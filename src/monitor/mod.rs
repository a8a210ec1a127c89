//! Monitoring core: targets, the monitored list, change dispatch and the
//! owner task that serializes all mutations.

mod dispatcher;
mod error;
mod list;
mod runtime;
mod status;
mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::*;
pub use error::*;
pub use list::*;
pub use runtime::*;
pub use status::*;
pub use target::*;
