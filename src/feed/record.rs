/// One subscription or folder in the feed list.
///
/// The list is at most two levels deep: top-level records are either feeds
/// or groups, and a feed may point at a top-level group through `group_id`.
/// Groups never carry a link and never belong to another group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    /// Batch-local id assigned by the decoder, or the row id when read from
    /// the store.
    pub id: i64,
    /// Display name. May be empty.
    pub title: String,
    /// Subscription URL. Empty for groups.
    pub link: String,
    /// True for folders, which have no link of their own.
    pub is_group: bool,
    /// Owning group, `None` for top-level records.
    pub group_id: Option<i64>,
    /// Fetch complete article content instead of the feed summary.
    pub retrieve_full_text: bool,
}

impl FeedRecord {
    /// A top-level feed.
    pub fn feed(
        id: i64,
        title: impl Into<String>,
        link: impl Into<String>,
        retrieve_full_text: bool,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            link: link.into(),
            is_group: false,
            group_id: None,
            retrieve_full_text,
        }
    }

    /// A top-level folder.
    pub fn group(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            link: String::new(),
            is_group: true,
            group_id: None,
            retrieve_full_text: false,
        }
    }

    /// A feed inside the group `group_id`.
    pub fn child(
        id: i64,
        group_id: i64,
        title: impl Into<String>,
        link: impl Into<String>,
        retrieve_full_text: bool,
    ) -> Self {
        Self {
            group_id: Some(group_id),
            ..Self::feed(id, title, link, retrieve_full_text)
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.group_id.is_none()
    }

    /// Whether the record has a non-blank subscription URL.
    pub fn has_link(&self) -> bool {
        !self.link.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_has_no_link_or_parent() {
        let group = FeedRecord::group(1, "News");
        assert!(group.is_group);
        assert!(group.is_top_level());
        assert!(!group.has_link());
        assert!(!group.retrieve_full_text);
    }

    #[test]
    fn test_child_points_at_group() {
        let child = FeedRecord::child(2, 1, "Feed", "https://example.com/rss", true);
        assert!(!child.is_group);
        assert!(!child.is_top_level());
        assert_eq!(child.group_id, Some(1));
        assert!(child.retrieve_full_text);
    }

    #[test]
    fn test_blank_link_is_not_a_link() {
        let feed = FeedRecord::feed(1, "Blank", "   ", false);
        assert!(!feed.has_link());
    }
}
