pub mod page;
pub mod record;

pub use page::{AnchorPolicy, CopyOutcome, InsertOutcome, SlottedPage};
pub use record::RecordKind;
