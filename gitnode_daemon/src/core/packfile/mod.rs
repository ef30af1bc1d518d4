//! The packfile reader and builder (spec.md §4.7, §4.11). The git smart
//! protocol transport that delivers/accepts these bytes is an external
//! collaborator per spec.md §1; this module only owns the wire format and
//! the per-blob size cap.

mod builder;
mod reader;
mod wire;

pub use builder::PackfileBuilder;
pub use reader::{PackfileReadResult, PackfileReader, ReadObject, ReferenceUpdateAuthorizer};
pub use wire::{decode_reference_update_request, encode_reference_update_request, RefCommand, ReferenceUpdateRequest};
