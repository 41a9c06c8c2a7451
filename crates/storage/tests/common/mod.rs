pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{alert_doc, backends};
