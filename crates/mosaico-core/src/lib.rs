//! Wire-independent value types shared by the whole SDK: timestamps, the
//! serialization format tag, resource-name packing and the catalog entities.
pub mod types;
