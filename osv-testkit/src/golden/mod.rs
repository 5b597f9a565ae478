//! Golden-output records: a restricted value model, its text form, and the
//! comparator that checks actual values against stored records.

pub mod comparator;
pub mod reader;
pub mod render;
pub mod value;

pub use comparator::{CompareKind, GoldenComparator, GoldenError};
pub use reader::{ParseError, parse};
pub use render::{render, render_compact};
pub use value::{CallRecord, GoldenValue, Timestamp};
