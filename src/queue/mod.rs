pub mod entry;
pub mod worker;

pub use entry::Entry;
pub use worker::{NoteQueue, QueueEvent};
