//! The two top-level reconcilers (§4.1, §4.4), each split into a pure
//! decision function and an impure cluster-touching wrapper.

pub mod csv;
pub mod subscription;
