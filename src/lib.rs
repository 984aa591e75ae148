pub mod error;
pub mod fc;
pub mod protocol;
pub mod reconciler;
pub mod stream;

pub(crate) mod json_scan;
pub(crate) mod util;
