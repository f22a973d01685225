use std::io::Read;

use super::opml::{document_text, OpmlDocument, OpmlError, OpmlOptions, Outline};
use super::record::FeedRecord;

/// Converts OPML documents into an ordered feed list.
#[derive(Debug, Clone, Default)]
pub struct OpmlDecoder {
    options: OpmlOptions,
}

impl OpmlDecoder {
    pub fn new(options: OpmlOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OpmlOptions {
        &self.options
    }

    /// Reads the whole stream and decodes it. See [`OpmlDecoder::decode_bytes`].
    pub fn decode<R: Read>(&self, mut reader: R) -> Result<Vec<FeedRecord>, OpmlError> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        self.decode_bytes(&content)
    }

    /// Decodes a raw document. Text that is not UTF-8 is read as described
    /// in [`document_text`], so a stray byte costs one character instead of
    /// the whole import.
    pub fn decode_bytes(&self, content: &[u8]) -> Result<Vec<FeedRecord>, OpmlError> {
        self.decode_str(&document_text(content))
    }

    /// Decodes OPML text into feed records, in document order.
    ///
    /// Top-level outlines with a feed URL become feeds; those without a URL
    /// but with children become groups, followed by one record per direct
    /// child that has a URL. Outlines with neither are skipped, as is any
    /// feed whose link starts with the deprecated prefix. A group stays in
    /// the output even when all of its children were skipped.
    ///
    /// Ids start at 1 and are local to this call. An empty result is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an [`OpmlError`] if the content is not OPML, after one retry
    /// with a repaired root tag.
    pub fn decode_str(&self, content: &str) -> Result<Vec<FeedRecord>, OpmlError> {
        let document = OpmlDocument::parse_or_repair(content)?;
        let records = self.collect(&document.outlines);
        tracing::debug!(records = records.len(), "Decoded OPML");
        Ok(records)
    }

    fn collect(&self, outlines: &[Outline]) -> Vec<FeedRecord> {
        let mut records = Vec::new();
        let mut next_id: i64 = 1;
        let mut skipped: usize = 0;

        for outline in outlines {
            match outline.xml_url() {
                Some(link) => {
                    if self.options.is_deprecated(link) {
                        skipped += 1;
                        continue;
                    }
                    records.push(FeedRecord::feed(
                        next_id,
                        outline.title(),
                        link,
                        self.full_text(outline),
                    ));
                    next_id += 1;
                }
                None if outline.children.is_empty() => {}
                None => {
                    let group_id = next_id;
                    next_id += 1;
                    records.push(FeedRecord::group(group_id, outline.title()));

                    for child in &outline.children {
                        let Some(link) = child.xml_url() else {
                            continue;
                        };
                        if self.options.is_deprecated(link) {
                            skipped += 1;
                            continue;
                        }
                        records.push(FeedRecord::child(
                            next_id,
                            group_id,
                            child.title(),
                            link,
                            self.full_text(child),
                        ));
                        next_id += 1;
                    }
                }
            }
        }

        if skipped > 0 {
            tracing::info!(skipped, "Skipped feeds with deprecated links");
        }

        records
    }

    fn full_text(&self, outline: &Outline) -> bool {
        outline.attribute(&self.options.full_text_attribute) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SUBSCRIPTIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Subscriptions</title></head>
  <body>
    <outline title="Solo" xmlUrl="https://solo.example.com/rss" retrieveFullText="true"/>
    <outline title="Tech">
      <outline title="Rust Blog" xmlUrl="https://blog.rust-lang.org/feed.xml"/>
      <outline title="LWN" xmlUrl="https://lwn.net/headlines/rss" retrieveFullText="true"/>
    </outline>
    <outline title="Empty folder"/>
    <outline title="News">
      <outline title="Daily" xmlUrl="https://daily.example.com/atom"/>
    </outline>
  </body>
</opml>"#;

    fn decode(content: &str) -> Vec<FeedRecord> {
        OpmlDecoder::default().decode_str(content).unwrap()
    }

    #[test]
    fn test_decode_feeds_and_groups() {
        let records = decode(SUBSCRIPTIONS);

        assert_eq!(
            records,
            vec![
                FeedRecord::feed(1, "Solo", "https://solo.example.com/rss", true),
                FeedRecord::group(2, "Tech"),
                FeedRecord::child(3, 2, "Rust Blog", "https://blog.rust-lang.org/feed.xml", false),
                FeedRecord::child(4, 2, "LWN", "https://lwn.net/headlines/rss", true),
                FeedRecord::group(5, "News"),
                FeedRecord::child(6, 5, "Daily", "https://daily.example.com/atom", false),
            ]
        );
    }

    #[test]
    fn test_ids_are_sequential_from_one() {
        let records = decode(SUBSCRIPTIONS);
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=records.len() as i64).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_group_id_names_one_group() {
        let records = decode(SUBSCRIPTIONS);
        for record in records.iter().filter(|r| r.group_id.is_some()) {
            let owners = records
                .iter()
                .filter(|g| Some(g.id) == record.group_id && g.is_group)
                .count();
            assert_eq!(owners, 1, "record {} should have exactly one group", record.id);
        }
    }

    #[test]
    fn test_decode_calls_are_independent() {
        let decoder = OpmlDecoder::default();
        let first = decoder.decode_str(SUBSCRIPTIONS).unwrap();
        let second = decoder.decode_str(SUBSCRIPTIONS).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_deprecated_top_level_feed_dropped() {
        let records = decode(
            r#"<opml version="2.0"><body>
                <outline title="Old" xmlUrl="http://news.google.com/news?q=rust&amp;output=rss"/>
                <outline title="Kept" xmlUrl="https://kept.example.com/rss"/>
            </body></opml>"#,
        );

        assert_eq!(
            records,
            vec![FeedRecord::feed(1, "Kept", "https://kept.example.com/rss", false)]
        );
    }

    #[test]
    fn test_deprecated_children_dropped_group_retained() {
        let records = decode(
            r#"<opml version="2.0"><body>
                <outline title="Google">
                    <outline title="Old 1" xmlUrl="http://news.google.com/news?q=a"/>
                    <outline title="Old 2" xmlUrl="http://news.google.com/news?q=b"/>
                </outline>
                <outline title="Mixed">
                    <outline title="Old" xmlUrl="http://news.google.com/news?q=c"/>
                    <outline title="New" xmlUrl="https://new.example.com/rss"/>
                </outline>
            </body></opml>"#,
        );

        assert_eq!(
            records,
            vec![
                FeedRecord::group(1, "Google"),
                FeedRecord::group(2, "Mixed"),
                FeedRecord::child(3, 2, "New", "https://new.example.com/rss", false),
            ]
        );
    }

    #[test]
    fn test_custom_options() {
        let decoder = OpmlDecoder::new(OpmlOptions {
            deprecated_link_prefix: "https://legacy.example.com/".to_string(),
            full_text_attribute: "fullText".to_string(),
        });

        let records = decoder
            .decode_str(
                r#"<opml><body>
                    <outline title="Legacy" xmlUrl="https://legacy.example.com/rss"/>
                    <outline title="Google" xmlUrl="http://news.google.com/news?q=a" fullText="true"/>
                    <outline title="Other" xmlUrl="https://other.example.com/rss" retrieveFullText="true"/>
                </body></opml>"#,
            )
            .unwrap();

        assert_eq!(
            records,
            vec![
                FeedRecord::feed(1, "Google", "http://news.google.com/news?q=a", true),
                FeedRecord::feed(2, "Other", "https://other.example.com/rss", false),
            ]
        );
    }

    #[test]
    fn test_full_text_requires_literal_true() {
        let records = decode(
            r#"<opml><body>
                <outline title="A" xmlUrl="https://a.example.com/rss" retrieveFullText="TRUE"/>
                <outline title="B" xmlUrl="https://b.example.com/rss" retrieveFullText="1"/>
                <outline title="C" xmlUrl="https://c.example.com/rss" retrieveFullText="false"/>
            </body></opml>"#,
        );

        assert!(records.iter().all(|r| !r.retrieve_full_text));
    }

    #[test]
    fn test_nested_folders_not_traversed() {
        let records = decode(
            r#"<opml><body>
                <outline title="Outer">
                    <outline title="Inner">
                        <outline title="Deep" xmlUrl="https://deep.example.com/rss"/>
                    </outline>
                    <outline title="Shallow" xmlUrl="https://shallow.example.com/rss"/>
                </outline>
            </body></opml>"#,
        );

        assert_eq!(
            records,
            vec![
                FeedRecord::group(1, "Outer"),
                FeedRecord::child(2, 1, "Shallow", "https://shallow.example.com/rss", false),
            ]
        );
    }

    #[test]
    fn test_top_level_feed_children_ignored() {
        let records = decode(
            r#"<opml><body>
                <outline title="Parent" xmlUrl="https://parent.example.com/rss">
                    <outline title="Child" xmlUrl="https://child.example.com/rss"/>
                </outline>
            </body></opml>"#,
        );

        assert_eq!(
            records,
            vec![FeedRecord::feed(1, "Parent", "https://parent.example.com/rss", false)]
        );
    }

    #[test]
    fn test_empty_document_decodes_to_nothing() {
        assert!(decode(r#"<opml version="2.0"><head/><body/></opml>"#).is_empty());
        assert!(decode(r#"<opml version="2.0"><body><outline title="x"/></body></opml>"#).is_empty());
    }

    #[test]
    fn test_malformed_header_repaired() {
        let records = decode(
            r#"<?xml version="1.0"?>
<opml version='1.1'>
  <body><outline title="Feed" xmlUrl="https://example.com/rss"/></body>
</opml>"#,
        );

        assert_eq!(
            records,
            vec![FeedRecord::feed(1, "Feed", "https://example.com/rss", false)]
        );
    }

    #[test]
    fn test_version_one_decodes_directly() {
        let records = decode(
            r#"<opml version="1.0"><body><outline title="Feed" xmlUrl="https://example.com/rss"/></body></opml>"#,
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_structural_error_fails() {
        let result = OpmlDecoder::default()
            .decode_str(r#"<opml version="1.0"><body><outline title="x"></body></opml>"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_from_reader() {
        let records = OpmlDecoder::default()
            .decode(SUBSCRIPTIONS.as_bytes())
            .unwrap();
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn test_decode_latin1_document() {
        let bytes: &[u8] = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n\
<opml version=\"1.0\"><body>\
<outline title=\"Caf\xe9\" xmlUrl=\"https://cafe.example.com/rss\"/>\
</body></opml>";

        let records = OpmlDecoder::default().decode(bytes).unwrap();
        assert_eq!(
            records,
            vec![FeedRecord::feed(1, "Caf\u{e9}", "https://cafe.example.com/rss", false)]
        );
    }

    #[test]
    fn test_decode_invalid_utf8_keeps_feed() {
        let bytes: &[u8] =
            b"<opml><body><outline title=\"\xff\" xmlUrl=\"https://x.example.com/rss\"/></body></opml>";

        let records = OpmlDecoder::default().decode(bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "\u{FFFD}");
    }

    #[test]
    fn test_group_of_only_subfolders_decodes_empty() {
        let records = decode(
            r#"<opml version="2.0"><body>
                <outline title="G">
                    <outline title="Sub">
                        <outline title="Deep" xmlUrl="https://deep.example.com/rss"/>
                    </outline>
                </outline>
            </body></opml>"#,
        );
        assert_eq!(records, vec![FeedRecord::group(1, "G")]);
    }
}
