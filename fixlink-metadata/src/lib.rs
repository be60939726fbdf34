//! Protocol metadata for metadata-driven FIX 4.x processing.
//!
//! A [`Protocol`] is the immutable, in-memory description of one FIX
//! dictionary: field definitions with semantic types and enumerations,
//! reusable components, message layouts, and the header/trailer shape.
//! It is built once (usually by the [`xml`] loader from a QuickFIX
//! dictionary file) and then shared read-only by every session in the
//! process.

mod protocol;
pub mod xml;

pub use protocol::{
    ComponentDef, FieldDef, FieldType, FieldValues, Member, MemberIter, MessageDef, MetadataError,
    MsgCat, Protocol, ProtocolBuilder, ProtocolOptions, TagNum,
};
