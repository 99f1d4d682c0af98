mod sequence_handler;
pub use sequence_handler::*;

mod topic_handler;
pub use topic_handler::*;
