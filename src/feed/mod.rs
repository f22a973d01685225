//! OPML conversion between documents and the feed list.
//!
//! - `record` - the [`FeedRecord`] model: feeds, groups, and feeds inside groups
//! - `opml` - document reading with `quick-xml`, header repair, and [`OpmlOptions`]
//! - `decode` - outline tree to an ordered record list with batch-local ids
//! - `encode` - record list to an OPML 2.0 document
//!
//! # Example
//!
//! ```
//! use feedport::feed::{OpmlDecoder, OpmlEncoder};
//!
//! let opml = r#"<opml version="2.0"><body>
//!     <outline title="News">
//!         <outline title="Example" xmlUrl="https://example.com/rss"/>
//!     </outline>
//! </body></opml>"#;
//!
//! let records = OpmlDecoder::default().decode_str(opml).unwrap();
//! assert_eq!(records.len(), 2);
//!
//! let exported = OpmlEncoder::default()
//!     .encode_to_string(&records, chrono::Utc::now())
//!     .unwrap();
//! assert!(exported.contains("https://example.com/rss"));
//! ```

mod decode;
mod encode;
mod opml;
mod record;

pub use decode::OpmlDecoder;
pub use encode::OpmlEncoder;
pub use opml::{
    document_text, repair_header, OpmlDocument, OpmlError, OpmlOptions, Outline,
    DEFAULT_DEPRECATED_LINK_PREFIX, DEFAULT_FULL_TEXT_ATTRIBUTE, MAX_OPML_DEPTH,
    RESERVED_OUTLINE_ATTRIBUTES,
};
pub use record::FeedRecord;
