pub mod patterns;
pub mod segmenter;

pub use patterns::{find_earliest_tag, safe_prefix_len, TagKind, TagMatch};
pub use segmenter::{Mode, Segment, TagSegmenter};
