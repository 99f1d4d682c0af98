//! Module responsible for marshaling and unmarshaling the control plane:
//! action names, action response envelopes, Flight schema metadata and the
//! DoPut/DoGet wire identifiers.
mod actions;
pub use actions::*;

mod metadata;
pub use metadata::*;

mod flight;
pub use flight::*;

mod errors;
pub use errors::*;
