//! Image decoding and geometry helpers.
//!
//! [`source`] turns a request payload into a decoded frame (choosing among
//! absolute path, session-relative filename and inline base64); [`ops`]
//! carries the crop/rotate/resize/color-space helpers the executors share.

pub mod ops;
pub mod source;

pub use source::{resolve_image_source, ImageSource, ResolvedFrame, SourceKind};
