pub mod html;
pub mod index;

pub use html::{render_report, write_report, ReportMeta};
pub use index::rebuild_index;
