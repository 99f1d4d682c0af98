//! Network plumbing: connections and their pool, the worker-lane pool, the
//! typed action dispatcher and the streaming seams over DoPut/DoGet.
mod connection;
pub use connection::*;

mod lanes;
pub use lanes::*;

mod do_action;
pub use do_action::*;

mod streams;
pub use streams::*;
