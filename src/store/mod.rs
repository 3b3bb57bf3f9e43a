mod poll_store;

pub use poll_store::{PollFilter, PollStore};
