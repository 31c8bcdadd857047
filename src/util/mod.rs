//! Small shared utilities.

pub mod indent;
pub mod strings;

pub use indent::strip_leading_indentation;
pub use strings::{byte_size, find_substring};
