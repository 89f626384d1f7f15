pub mod coordinator;
pub mod link;

pub use coordinator::{BroadcastReport, Coordinator};
pub use link::{Inbox, LocalLink};
