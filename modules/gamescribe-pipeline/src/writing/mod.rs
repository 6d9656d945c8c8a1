pub mod assembly;
pub mod cross_refs;
pub mod pacing;
pub mod section_writer;

pub use assembly::{collect_sources, render_markdown};
pub use cross_refs::SectionWriteState;
pub use pacing::ParagraphRange;
pub use section_writer::{SectionExtras, SectionResearch, SectionWriter, WriteMode};
