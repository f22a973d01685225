use std::collections::{HashMap, HashSet};
use std::io::Write;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::opml::{OpmlError, OpmlOptions};
use super::record::FeedRecord;

/// Converts a feed list into an OPML 2.0 document.
#[derive(Debug, Clone, Default)]
pub struct OpmlEncoder {
    options: OpmlOptions,
}

impl OpmlEncoder {
    pub fn new(options: OpmlOptions) -> Self {
        Self { options }
    }

    /// Writes `records` as an OPML 2.0 document to `writer`.
    ///
    /// Top-level records become outlines in input order. Each group carries
    /// the records whose `group_id` matches it, also in input order.
    /// Records pointing at a group that is not in `records` are left out.
    ///
    /// # Errors
    ///
    /// Only I/O failures from `writer`.
    pub fn encode<W: Write>(
        &self,
        records: &[FeedRecord],
        created: DateTime<Utc>,
        writer: W,
    ) -> Result<(), OpmlError> {
        let mut top_level = Vec::new();
        let mut children: HashMap<i64, Vec<&FeedRecord>> = HashMap::new();
        for record in records {
            match record.group_id {
                None => top_level.push(record),
                Some(group_id) => children.entry(group_id).or_default().push(record),
            }
        }

        let group_ids: HashSet<i64> = top_level
            .iter()
            .filter(|r| r.is_group)
            .map(|r| r.id)
            .collect();
        let orphans: usize = children
            .iter()
            .filter(|(group_id, _)| !group_ids.contains(group_id))
            .map(|(_, members)| members.len())
            .sum();
        if orphans > 0 {
            tracing::warn!(orphans, "Skipping feeds whose group is missing from export");
        }

        let full_text_attribute = match self.options.validate() {
            Ok(()) => Some(self.options.full_text_attribute.as_str()),
            Err(reason) => {
                tracing::warn!(%reason, "Leaving full-text flags out of export");
                None
            }
        };

        let mut writer = Writer::new_with_indent(writer, b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut opml = BytesStart::new("opml");
        opml.push_attribute(("version", "2.0"));
        writer.write_event(Event::Start(opml))?;

        // <head><dateCreated>...</dateCreated></head>
        writer.write_event(Event::Start(BytesStart::new("head")))?;
        writer.write_event(Event::Start(BytesStart::new("dateCreated")))?;
        writer.write_event(Event::Text(BytesText::new(&created.to_rfc2822())))?;
        writer.write_event(Event::End(BytesEnd::new("dateCreated")))?;
        writer.write_event(Event::End(BytesEnd::new("head")))?;

        writer.write_event(Event::Start(BytesStart::new("body")))?;

        for record in top_level {
            let members: &[&FeedRecord] = if record.is_group {
                children.get(&record.id).map(Vec::as_slice).unwrap_or_default()
            } else {
                &[]
            };

            if members.is_empty() {
                writer.write_event(Event::Empty(outline(record, full_text_attribute)))?;
                continue;
            }

            writer.write_event(Event::Start(outline(record, full_text_attribute)))?;
            for member in members {
                writer.write_event(Event::Empty(outline(member, full_text_attribute)))?;
            }
            writer.write_event(Event::End(BytesEnd::new("outline")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("body")))?;
        writer.write_event(Event::End(BytesEnd::new("opml")))?;
        writer.get_mut().flush()?;

        Ok(())
    }

    /// Encodes into an in-memory buffer.
    pub fn encode_to_vec(
        &self,
        records: &[FeedRecord],
        created: DateTime<Utc>,
    ) -> Result<Vec<u8>, OpmlError> {
        let mut buf = Vec::new();
        self.encode(records, created, &mut buf)?;
        Ok(buf)
    }

    pub fn encode_to_string(
        &self,
        records: &[FeedRecord],
        created: DateTime<Utc>,
    ) -> Result<String, OpmlError> {
        let buf = self.encode_to_vec(records, created)?;
        String::from_utf8(buf)
            .map_err(|e| OpmlError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

fn outline(record: &FeedRecord, full_text_attribute: Option<&str>) -> BytesStart<'static> {
    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("text", record.title.as_str()));
    outline.push_attribute(("title", record.title.as_str()));
    if record.has_link() {
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("xmlUrl", record.link.as_str()));
    }
    if let Some(name) = full_text_attribute.filter(|_| record.retrieve_full_text) {
        outline.push_attribute((name, "true"));
    }
    outline
}
