//! Compact binary encoding (spec.md §4.1): variable-length sizes, tagged
//! optionals, encapsulations, and the class-instance/user-exception slicing
//! schemes built on top of them.

mod format;
mod slicing;
mod stream;
mod varint;

pub use format::{Format, VersionPair, ENCODING_VERSION, PROTOCOL_VERSION};
pub use slicing::{
    decode_user_error, encode_user_error, ClassFactory, ClassFactoryRegistry, ClassValue,
    DecodedUserError, InstanceArena, OpaqueClassValue, SliceBytes,
};
pub use stream::{
    Encapsulation, EncapsulationHeader, EncapsulationMark, InputStream, OutputStream,
    DEFAULT_CLASS_GRAPH_DEPTH_MAX, DEFAULT_MESSAGE_SIZE_MAX,
};
pub use varint::{read_signed_size, read_size, write_signed_size, write_size, SIZE_ESCAPE};
