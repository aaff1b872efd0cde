mod json;
mod machine;
mod time;

pub(crate) use json::{is_truthy, null_default};
pub use machine::{machine_id, normalize_machine_id};
pub use time::now_rfc3339;
