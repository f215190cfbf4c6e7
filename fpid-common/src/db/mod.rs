//! Identity store: schema, tracks, bindings and merges

pub mod bindings;
pub mod foreignid;
pub mod init;
pub mod merge;
pub mod models;
pub mod stats;
pub mod tracks;
mod transaction;

pub use bindings::*;
pub use foreignid::*;
pub use init::*;
pub use merge::*;
pub use models::*;
pub use stats::*;
pub use tracks::*;
