//! # entimap codec
//!
//! Raw property values and their persistent encoding.
//!
//! Composite states hold [`Value`]s keyed by property name; the portable
//! form of a state is a [`Document`]. Store adapters persist documents as
//! CBOR through [`to_cbor`] / [`from_cbor`].
//!
//! ## Usage
//!
//! ```
//! use entimap_codec::{from_cbor, to_cbor, Document, Value};
//!
//! let doc = Document::new().with("name", "Alice").with("age", 30i64);
//! let bytes = to_cbor(&doc).unwrap();
//!
//! let decoded: Document = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded.get("age"), Some(&Value::Integer(30)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod encode;
mod error;
mod value;

pub use document::Document;
pub use encode::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::Value;
