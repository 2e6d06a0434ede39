mod entry;
mod submission;

pub use self::entry::Entry;
pub(crate) use self::entry::EntryRow;
pub use self::submission::Submission;
pub(crate) use self::submission::{Triplet, TripletKey};
