use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewUser {
    pub login: String,
    pub password: String,
    pub email: String,
    pub display_name: String,
    pub nickname: String,
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub registered: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    /// `publish` or `draft`.
    pub status: String,
    pub author: Option<u64>,
    pub date: String,
    pub date_gmt: String,
    pub modified: String,
    pub modified_gmt: String,
    pub comment_status: String,
    pub ping_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAttachment {
    /// Local file inside the upload directory.
    pub path: PathBuf,
    /// Public URL the file is served from.
    pub url: String,
    pub title: String,
    pub mime_type: String,
    pub author: Option<u64>,
    pub date: String,
    pub date_gmt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentRef {
    pub id: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewComment {
    pub post: u64,
    pub author: String,
    pub author_email: String,
    pub author_url: String,
    pub author_ip: String,
    pub date: String,
    pub date_gmt: String,
    pub content: String,
    pub approved: bool,
    /// `comment` or `trackback`.
    pub comment_type: String,
}

/// The destination CMS as seen by the importers.
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for
/// transport or server failures.
pub trait ContentStore {
    fn home_url(&mut self) -> Result<String>;

    fn find_user_by_login(&mut self, login: &str) -> Result<Option<u64>>;
    fn create_user(&mut self, user: &NewUser) -> Result<u64>;
    fn set_user_role(&mut self, user: u64, role: &str) -> Result<()>;

    fn find_category_by_slug(&mut self, slug: &str) -> Result<Option<u64>>;
    fn create_category(&mut self, label: &str, slug: &str, parent: Option<u64>) -> Result<u64>;

    fn find_post(&mut self, title: &str, date: &str) -> Result<Option<u64>>;
    fn create_post(&mut self, post: &NewPost) -> Result<u64>;
    fn post_content(&mut self, post: u64) -> Result<String>;
    fn update_post_content(&mut self, post: u64, content: &str) -> Result<()>;
    fn post_category_names(&mut self, post: u64) -> Result<Vec<String>>;
    fn set_post_categories(&mut self, post: u64, categories: &[u64], append: bool) -> Result<()>;
    fn add_post_tags(&mut self, post: u64, tags: &[String]) -> Result<()>;

    fn find_attachment(&mut self, title: &str, date: &str) -> Result<Option<AttachmentRef>>;
    fn create_attachment(&mut self, attachment: &NewAttachment) -> Result<AttachmentRef>;
    fn set_attachment_parent(&mut self, attachment: u64, post: u64) -> Result<()>;

    fn comment_exists(&mut self, author: &str, date: &str) -> Result<bool>;
    fn create_comment(&mut self, comment: &NewComment) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredCategory {
    pub name: String,
    pub slug: String,
    pub parent: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredPost {
    pub post: NewPost,
    pub categories: Vec<u64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredAttachment {
    pub attachment: NewAttachment,
    pub parent: Option<u64>,
}

/// A content store held entirely in memory. Backs `--dry-run` and the tests.
///
/// Like a fresh WordPress install it starts with one `Uncategorized` category,
/// which new posts receive until something else is assigned.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStore {
    home_url: String,
    next_id: u64,
    pub users: BTreeMap<u64, NewUser>,
    pub categories: BTreeMap<u64, StoredCategory>,
    pub posts: BTreeMap<u64, StoredPost>,
    pub attachments: BTreeMap<u64, StoredAttachment>,
    pub comments: BTreeMap<u64, NewComment>,
    /// Every mutating call, in order, e.g. `set_post_categories 12 [5] append=false`.
    pub calls: Vec<String>,
    /// Post titles whose creation is rejected.
    #[cfg(test)]
    #[serde(skip)]
    pub reject_post_titles: std::collections::BTreeSet<String>,
    /// Serve new attachments from `{media_url}{file name}` instead of their own URL.
    #[cfg(test)]
    #[serde(skip)]
    pub media_url: Option<String>,
}

impl MemoryStore {
    pub fn new(home_url: &str) -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            1,
            StoredCategory {
                name: UNCATEGORIZED.to_string(),
                slug: "uncategorized".to_string(),
                parent: None,
            },
        );
        Self {
            home_url: home_url.trim_end_matches('/').to_string(),
            next_id: 2,
            users: BTreeMap::new(),
            categories,
            posts: BTreeMap::new(),
            attachments: BTreeMap::new(),
            comments: BTreeMap::new(),
            calls: Vec::new(),
            #[cfg(test)]
            reject_post_titles: std::collections::BTreeSet::new(),
            #[cfg(test)]
            media_url: None,
        }
    }

    /// Number of recorded calls whose name is `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn stored_post(&mut self, post: u64) -> Result<&mut StoredPost> {
        match self.posts.get_mut(&post) {
            Some(stored) => Ok(stored),
            None => bail!("post {post} does not exist"),
        }
    }
}

impl ContentStore for MemoryStore {
    fn home_url(&mut self) -> Result<String> {
        Ok(self.home_url.clone())
    }

    fn find_user_by_login(&mut self, login: &str) -> Result<Option<u64>> {
        Ok(self
            .users
            .iter()
            .find(|(_, user)| user.login == login)
            .map(|(id, _)| *id))
    }

    fn create_user(&mut self, user: &NewUser) -> Result<u64> {
        if user.login.trim().is_empty() {
            bail!("cannot create a user with an empty login");
        }
        if self.find_user_by_login(&user.login)?.is_some() {
            bail!("login `{}` is already taken", user.login);
        }
        self.calls.push(format!("create_user {}", user.login));
        let id = self.allocate_id();
        self.users.insert(id, user.clone());
        Ok(id)
    }

    fn set_user_role(&mut self, user: u64, role: &str) -> Result<()> {
        let Some(stored) = self.users.get_mut(&user) else {
            bail!("user {user} does not exist");
        };
        self.calls.push(format!("set_user_role {user} {role}"));
        stored.role = role.to_string();
        Ok(())
    }

    fn find_category_by_slug(&mut self, slug: &str) -> Result<Option<u64>> {
        Ok(self
            .categories
            .iter()
            .find(|(_, category)| category.slug == slug)
            .map(|(id, _)| *id))
    }

    fn create_category(&mut self, label: &str, slug: &str, parent: Option<u64>) -> Result<u64> {
        if let Some(parent) = parent
            && !self.categories.contains_key(&parent)
        {
            bail!("parent category {parent} does not exist");
        }
        self.calls.push(format!("create_category {slug}"));
        let id = self.allocate_id();
        self.categories.insert(
            id,
            StoredCategory {
                name: label.to_string(),
                slug: slug.to_string(),
                parent,
            },
        );
        Ok(id)
    }

    fn find_post(&mut self, title: &str, date: &str) -> Result<Option<u64>> {
        Ok(self
            .posts
            .iter()
            .find(|(_, stored)| stored.post.title == title && stored.post.date == date)
            .map(|(id, _)| *id))
    }

    fn create_post(&mut self, post: &NewPost) -> Result<u64> {
        #[cfg(test)]
        if self.reject_post_titles.contains(&post.title) {
            bail!("post `{}` was rejected by the store", post.title);
        }
        self.calls.push(format!("create_post {}", post.title));
        let id = self.allocate_id();
        self.posts.insert(
            id,
            StoredPost {
                post: post.clone(),
                categories: vec![1],
                tags: Vec::new(),
            },
        );
        Ok(id)
    }

    fn post_content(&mut self, post: u64) -> Result<String> {
        Ok(self.stored_post(post)?.post.content.clone())
    }

    fn update_post_content(&mut self, post: u64, content: &str) -> Result<()> {
        self.calls.push(format!("update_post_content {post}"));
        self.stored_post(post)?.post.content = content.to_string();
        Ok(())
    }

    fn post_category_names(&mut self, post: u64) -> Result<Vec<String>> {
        let ids = self.stored_post(post)?.categories.clone();
        Ok(ids
            .iter()
            .filter_map(|id| self.categories.get(id))
            .map(|category| category.name.clone())
            .collect())
    }

    fn set_post_categories(&mut self, post: u64, categories: &[u64], append: bool) -> Result<()> {
        if let Some(missing) = categories
            .iter()
            .find(|id| !self.categories.contains_key(*id))
        {
            bail!("category {missing} does not exist");
        }
        self.calls.push(format!(
            "set_post_categories {post} {categories:?} append={append}"
        ));
        let stored = self.stored_post(post)?;
        if !append {
            stored.categories.clear();
        }
        for id in categories {
            if !stored.categories.contains(id) {
                stored.categories.push(*id);
            }
        }
        Ok(())
    }

    fn add_post_tags(&mut self, post: u64, tags: &[String]) -> Result<()> {
        self.calls.push(format!("add_post_tags {post} {tags:?}"));
        let stored = self.stored_post(post)?;
        for tag in tags {
            if !stored.tags.contains(tag) {
                stored.tags.push(tag.clone());
            }
        }
        Ok(())
    }

    fn find_attachment(&mut self, title: &str, date: &str) -> Result<Option<AttachmentRef>> {
        Ok(self
            .attachments
            .iter()
            .find(|(_, stored)| {
                stored.attachment.title == title && stored.attachment.date == date
            })
            .map(|(id, stored)| AttachmentRef {
                id: *id,
                url: stored.attachment.url.clone(),
            }))
    }

    fn create_attachment(&mut self, attachment: &NewAttachment) -> Result<AttachmentRef> {
        self.calls.push(format!("create_attachment {}", attachment.title));
        let url = attachment.url.clone();
        #[cfg(test)]
        let url = match (&self.media_url, attachment.path.file_name()) {
            (Some(media_url), Some(name)) => format!("{media_url}{}", name.to_string_lossy()),
            _ => url,
        };
        let id = self.allocate_id();
        self.attachments.insert(
            id,
            StoredAttachment {
                attachment: NewAttachment {
                    url: url.clone(),
                    ..attachment.clone()
                },
                parent: None,
            },
        );
        Ok(AttachmentRef { id, url })
    }

    fn set_attachment_parent(&mut self, attachment: u64, post: u64) -> Result<()> {
        if !self.posts.contains_key(&post) {
            bail!("post {post} does not exist");
        }
        self.calls
            .push(format!("set_attachment_parent {attachment} {post}"));
        match self.attachments.get_mut(&attachment) {
            Some(stored) => {
                stored.parent = Some(post);
                Ok(())
            }
            None => bail!("attachment {attachment} does not exist"),
        }
    }

    fn comment_exists(&mut self, author: &str, date: &str) -> Result<bool> {
        Ok(self
            .comments
            .values()
            .any(|comment| comment.author == author && comment.date == date))
    }

    fn create_comment(&mut self, comment: &NewComment) -> Result<u64> {
        if !self.posts.contains_key(&comment.post) {
            bail!("post {} does not exist", comment.post);
        }
        self.calls.push(format!("create_comment {}", comment.author));
        let id = self.allocate_id();
        self.comments.insert(id, comment.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, date: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            slug: title.to_lowercase(),
            content: String::new(),
            status: "publish".to_string(),
            author: None,
            date: date.to_string(),
            date_gmt: date.to_string(),
            modified: date.to_string(),
            modified_gmt: date.to_string(),
            comment_status: "open".to_string(),
            ping_status: "closed".to_string(),
        }
    }

    #[test]
    fn new_posts_start_uncategorized() {
        let mut store = MemoryStore::new("https://new.example/");
        let id = store.create_post(&post("Hello", "2010-01-01 10:00:00")).expect("create");
        assert_eq!(
            store.post_category_names(id).expect("names"),
            vec![UNCATEGORIZED.to_string()]
        );
        assert_eq!(store.home_url().expect("home"), "https://new.example");
    }

    #[test]
    fn set_categories_appends_or_replaces() {
        let mut store = MemoryStore::new("https://new.example");
        let id = store.create_post(&post("Hello", "2010-01-01 10:00:00")).expect("create");
        let news = store.create_category("News", "news", None).expect("news");
        let misc = store.create_category("Misc", "misc", Some(news)).expect("misc");

        store.set_post_categories(id, &[news], false).expect("replace");
        store.set_post_categories(id, &[misc], true).expect("append");
        assert_eq!(store.posts[&id].categories, vec![news, misc]);
        assert_eq!(store.call_count("set_post_categories"), 2);
        assert_eq!(
            store.calls.last().map(String::as_str),
            Some(format!("set_post_categories {id} [{misc}] append=true").as_str())
        );
        assert!(store.set_post_categories(id, &[999], true).is_err());
    }

    #[test]
    fn posts_are_found_by_title_and_date() {
        let mut store = MemoryStore::new("https://new.example");
        let id = store.create_post(&post("Hello", "2010-01-01 10:00:00")).expect("create");
        assert_eq!(store.find_post("Hello", "2010-01-01 10:00:00").expect("find"), Some(id));
        assert_eq!(store.find_post("Hello", "2011-01-01 10:00:00").expect("find"), None);
    }

    #[test]
    fn duplicate_logins_are_rejected() {
        let mut store = MemoryStore::new("https://new.example");
        let user = NewUser {
            login: "melody".to_string(),
            password: "secret".to_string(),
            email: "melody@example.com".to_string(),
            display_name: "Melody".to_string(),
            nickname: "Melody".to_string(),
            registered: "2008-01-01 00:00:00".to_string(),
            role: "editor".to_string(),
        };
        let id = store.create_user(&user).expect("create");
        assert_eq!(store.find_user_by_login("melody").expect("find"), Some(id));
        assert!(store.create_user(&user).is_err());
        store.set_user_role(id, "subscriber").expect("role");
        assert_eq!(store.users[&id].role, "subscriber");
        assert!(store.set_user_role(id + 100, "editor").is_err());
    }
}
