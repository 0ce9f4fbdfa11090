use std::collections::BTreeMap;

/// Attributes and text children of one top-level backup element, before typing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: BTreeMap<String, String>,
}

impl RawElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, key: &str, value: &str) -> Self {
        self.children.insert(key.to_string(), value.to_string());
        self
    }

    fn attr(&self, key: &str) -> String {
        self.attributes.get(key).cloned().unwrap_or_default()
    }

    fn child(&self, key: &str) -> String {
        self.children.get(key).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlogRecord {
    pub id: String,
    pub name: String,
    pub site_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorRecord {
    pub id: String,
    pub name: String,
    pub nickname: String,
    pub email: String,
    pub password: String,
    /// `1` active, `2` inactive.
    pub status: String,
    pub created_on: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryRecord {
    pub id: String,
    pub title: String,
    pub basename: String,
    /// `2` is published.
    pub status: String,
    pub author_id: String,
    pub allow_comments: String,
    pub allow_pings: String,
    pub authored_on: String,
    pub created_on: String,
    pub modified_on: String,
    pub text: String,
    pub text_more: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    File,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    pub kind: AssetKind,
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub label: String,
    /// Set on derived thumbnails, pointing at the original asset.
    pub parent: String,
    pub created_by: String,
    pub created_on: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryRecord {
    pub id: String,
    pub label: String,
    pub basename: String,
    pub parent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementRecord {
    pub id: String,
    pub category_id: String,
    pub entry_id: String,
    pub is_primary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTagRecord {
    pub id: String,
    pub object_datasource: String,
    pub object_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAssetRecord {
    pub id: String,
    pub asset_id: String,
    pub object_ds: String,
    pub object_id: String,
    pub embedded: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: String,
    pub entry_id: String,
    pub author: String,
    pub email: String,
    pub url: String,
    pub ip: String,
    pub created_on: String,
    /// `1` means not junk.
    pub junk_status: String,
    pub visible: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackbackRecord {
    pub id: String,
    pub entry_id: String,
    pub title: String,
    pub url: String,
    pub created_on: String,
    pub is_disabled: String,
    pub description: String,
}

/// A typed top-level element of a Movable Type backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupRecord {
    Blog(BlogRecord),
    Author(AuthorRecord),
    Entry(EntryRecord),
    Asset(AssetRecord),
    Tag(TagRecord),
    Category(CategoryRecord),
    Placement(PlacementRecord),
    ObjectTag(ObjectTagRecord),
    ObjectAsset(ObjectAssetRecord),
    Comment(CommentRecord),
    Trackback(TrackbackRecord),
}

impl BackupRecord {
    /// Type a raw element by tag name. Unsupported tags yield `None`.
    pub fn from_raw(raw: &RawElement) -> Option<Self> {
        let record = match raw.name.as_str() {
            "blog" => Self::Blog(BlogRecord {
                id: raw.attr("id"),
                name: raw.attr("name"),
                site_url: raw.attr("site_url"),
            }),
            "author" => Self::Author(AuthorRecord {
                id: raw.attr("id"),
                name: raw.attr("name"),
                nickname: raw.attr("nickname"),
                email: raw.attr("email"),
                password: raw.attr("password"),
                status: raw.attr("status"),
                created_on: raw.attr("created_on"),
            }),
            "entry" => Self::Entry(EntryRecord {
                id: raw.attr("id"),
                title: raw.attr("title"),
                basename: raw.attr("basename"),
                status: raw.attr("status"),
                author_id: raw.attr("author_id"),
                allow_comments: raw.attr("allow_comments"),
                allow_pings: raw.attr("allow_pings"),
                authored_on: raw.attr("authored_on"),
                created_on: raw.attr("created_on"),
                modified_on: raw.attr("modified_on"),
                text: raw.child("text"),
                text_more: raw.child("text_more"),
            }),
            "image" | "file" => Self::Asset(AssetRecord {
                kind: if raw.name == "image" {
                    AssetKind::Image
                } else {
                    AssetKind::File
                },
                id: raw.attr("id"),
                file_name: raw.attr("file_name"),
                mime_type: raw.attr("mime_type"),
                label: raw.attr("label"),
                parent: raw.attr("parent"),
                created_by: raw.attr("created_by"),
                created_on: raw.attr("created_on"),
                url: raw.attr("url"),
            }),
            "tag" => Self::Tag(TagRecord {
                id: raw.attr("id"),
                name: raw.attr("name"),
            }),
            "category" => Self::Category(CategoryRecord {
                id: raw.attr("id"),
                label: raw.attr("label"),
                basename: raw.attr("basename"),
                parent: raw.attr("parent"),
            }),
            "placement" => Self::Placement(PlacementRecord {
                id: raw.attr("id"),
                category_id: raw.attr("category_id"),
                entry_id: raw.attr("entry_id"),
                is_primary: raw.attr("is_primary"),
            }),
            "objecttag" => Self::ObjectTag(ObjectTagRecord {
                id: raw.attr("id"),
                object_datasource: raw.attr("object_datasource"),
                object_id: raw.attr("object_id"),
                tag_id: raw.attr("tag_id"),
            }),
            "objectasset" => Self::ObjectAsset(ObjectAssetRecord {
                id: raw.attr("id"),
                asset_id: raw.attr("asset_id"),
                object_ds: raw.attr("object_ds"),
                object_id: raw.attr("object_id"),
                embedded: raw.attr("embedded"),
            }),
            "comment" => Self::Comment(CommentRecord {
                id: raw.attr("id"),
                entry_id: raw.attr("entry_id"),
                author: raw.attr("author"),
                email: raw.attr("email"),
                url: raw.attr("url"),
                ip: raw.attr("ip"),
                created_on: raw.attr("created_on"),
                junk_status: raw.attr("junk_status"),
                visible: raw.attr("visible"),
                text: raw.child("text"),
            }),
            "trackback" => Self::Trackback(TrackbackRecord {
                id: raw.attr("id"),
                entry_id: raw.attr("entry_id"),
                title: raw.attr("title"),
                url: raw.attr("url"),
                created_on: raw.attr("created_on"),
                is_disabled: raw.attr("is_disabled"),
                description: raw.child("description"),
            }),
            _ => return None,
        };
        Some(record)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blog(_) => "blog",
            Self::Author(_) => "author",
            Self::Entry(_) => "entry",
            Self::Asset(asset) => asset.kind.as_str(),
            Self::Tag(_) => "tag",
            Self::Category(_) => "category",
            Self::Placement(_) => "placement",
            Self::ObjectTag(_) => "objecttag",
            Self::ObjectAsset(_) => "objectasset",
            Self::Comment(_) => "comment",
            Self::Trackback(_) => "trackback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_reads_attributes_and_text_children() {
        let raw = RawElement::new("entry")
            .with_attr("id", "9")
            .with_attr("title", "Hello")
            .with_attr("basename", "hello_world")
            .with_attr("status", "2")
            .with_child("text", "<p>Body</p>")
            .with_child("text_more", "More");
        let Some(BackupRecord::Entry(entry)) = BackupRecord::from_raw(&raw) else {
            panic!("expected entry record");
        };
        assert_eq!(entry.id, "9");
        assert_eq!(entry.basename, "hello_world");
        assert_eq!(entry.text, "<p>Body</p>");
        assert_eq!(entry.text_more, "More");
        assert_eq!(entry.allow_pings, "");
    }

    #[test]
    fn image_and_file_share_the_asset_record() {
        let image = BackupRecord::from_raw(&RawElement::new("image").with_attr("id", "3"))
            .expect("image");
        let file = BackupRecord::from_raw(&RawElement::new("file").with_attr("id", "4"))
            .expect("file");
        assert_eq!(image.kind(), "image");
        assert_eq!(file.kind(), "file");
    }

    #[test]
    fn unknown_tags_are_not_typed() {
        assert!(BackupRecord::from_raw(&RawElement::new("permission")).is_none());
        assert!(BackupRecord::from_raw(&RawElement::new("trackback")).is_some());
    }
}
