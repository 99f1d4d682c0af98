mod topic_read_state;
pub use topic_read_state::*;

mod topic_reader;
pub use topic_reader::*;

mod sequence_reader;
pub use sequence_reader::*;
