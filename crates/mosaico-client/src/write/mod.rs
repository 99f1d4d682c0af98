mod topic_write_state;
pub use topic_write_state::*;

mod topic_writer;
pub use topic_writer::*;

mod sequence_writer;
pub use sequence_writer::*;
