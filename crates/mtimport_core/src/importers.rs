use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ImportOptions, PlacementPolicy};
use crate::fetch::{ResourceFetcher, download_resource, public_url};
use crate::image_size::file_dimensions;
use crate::mapping::{AssetMapping, MappingTable};
use crate::records::{
    AssetRecord, AuthorRecord, BackupRecord, BlogRecord, CategoryRecord, CommentRecord,
    EntryRecord, ObjectAssetRecord, ObjectTagRecord, PlacementRecord, TagRecord, TrackbackRecord,
};
use crate::rewrite::{BrokenKind, BrokenResource, RegisteredAsset, SiteContext, rewrite_content};
use crate::runtime::trailing_slash;
use crate::store::{ContentStore, NewAttachment, NewComment, NewPost, NewUser, UNCATEGORIZED};

const LDAP_PREFIX: &str = "ldaprename";
const MORE_SEPARATOR: &str = "\n<!--more-->\n";
const PASSWORD_LENGTH: usize = 20;
const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()";
const TIMESTAMP_FORMATS: &[&str] = &["%Y%m%d%H%M%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Created,
    Existing,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EntityCounts {
    fn record(&mut self, action: ImportAction) {
        match action {
            ImportAction::Created => self.created += 1,
            ImportAction::Existing => self.existing += 1,
            ImportAction::Skipped => self.skipped += 1,
            ImportAction::Failed => self.failed += 1,
        }
    }
}

/// Everything a finished session hands back to its caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub counts: BTreeMap<String, EntityCounts>,
    pub broken: Vec<BrokenResource>,
    pub errors: usize,
    pub mapping: MappingTable,
}

/// State shared by the entity importers across every chunk of one backup.
pub struct ImportSession<'a, S, F>
where
    S: ContentStore + ?Sized,
    F: ResourceFetcher + ?Sized,
{
    store: &'a mut S,
    fetcher: &'a mut F,
    options: ImportOptions,
    site: SiteContext,
    staging_dir: PathBuf,
    dry_run: bool,
    mapping: MappingTable,
    broken: Vec<BrokenResource>,
    counts: BTreeMap<String, EntityCounts>,
    errors: usize,
}

impl<'a, S, F> ImportSession<'a, S, F>
where
    S: ContentStore + ?Sized,
    F: ResourceFetcher + ?Sized,
{
    pub fn new(
        store: &'a mut S,
        fetcher: &'a mut F,
        options: ImportOptions,
        site: SiteContext,
        staging_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            fetcher,
            options,
            site,
            staging_dir,
            dry_run: false,
            mapping: MappingTable::default(),
            broken: Vec::new(),
            counts: BTreeMap::new(),
            errors: 0,
        }
    }

    /// Leave staged files where they are instead of moving them into the upload dir.
    /// Post bodies are then pointed at them by searching the staging dir.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.site.staging_dir = dry_run.then(|| self.staging_dir.clone());
        self
    }

    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    pub fn site(&self) -> &SiteContext {
        &self.site
    }

    pub fn broken(&self) -> &[BrokenResource] {
        &self.broken
    }

    pub fn finish(self) -> SessionSummary {
        SessionSummary {
            counts: self.counts,
            broken: self.broken,
            errors: self.errors,
            mapping: self.mapping,
        }
    }

    /// Route one record to its importer. Store and lookup failures are logged and
    /// counted; they never stop the session.
    pub fn import_record(&mut self, record: &BackupRecord) -> ImportAction {
        let result = match record {
            BackupRecord::Blog(blog) => Ok(self.import_blog(blog)),
            BackupRecord::Author(author) => self.import_user(author),
            BackupRecord::Entry(entry) => self.import_post(entry),
            BackupRecord::Asset(asset) => self.import_asset(asset),
            BackupRecord::Tag(tag) => Ok(self.import_tag(tag)),
            BackupRecord::Category(category) => self.import_category(category),
            BackupRecord::Placement(placement) => self.import_placement(placement),
            BackupRecord::ObjectTag(object_tag) => self.import_object_tag(object_tag),
            BackupRecord::ObjectAsset(object_asset) => self.import_object_asset(object_asset),
            BackupRecord::Comment(comment) => self.import_comment(comment),
            BackupRecord::Trackback(trackback) => self.import_trackback(trackback),
        };
        let action = match result {
            Ok(action) => action,
            Err(err) => {
                error!(kind = record.kind(), error = %format!("{err:#}"), "import failed");
                self.errors += 1;
                ImportAction::Failed
            }
        };
        self.counts
            .entry(record.kind().to_string())
            .or_default()
            .record(action);
        action
    }

    fn import_blog(&mut self, blog: &BlogRecord) -> ImportAction {
        let site_url = blog.site_url.trim();
        if site_url.is_empty() {
            warn!(old_id = %blog.id, "blog has no site_url; content will not be rewritten");
            return ImportAction::Skipped;
        }
        self.site.old_site_url = trailing_slash(site_url);
        info!(old_id = %blog.id, site_url = %self.site.old_site_url, "old site");
        ImportAction::Existing
    }

    fn import_user(&mut self, author: &AuthorRecord) -> Result<ImportAction> {
        let mut login = author.name.trim().to_string();
        if let Some(stripped) = login.strip_prefix(LDAP_PREFIX).map(str::to_string) {
            if stripped.is_empty() {
                warn!(old_id = %author.id, "skipping bare `{LDAP_PREFIX}` account");
                return Ok(ImportAction::Skipped);
            }
            if let Some(user_id) = self.store.find_user_by_login(&stripped)? {
                debug!(old_id = %author.id, login = %stripped, "reusing renamed account");
                return self.reuse_user(author, user_id);
            }
            login = stripped.to_lowercase();
        }
        if login.is_empty() {
            warn!(old_id = %author.id, "author has no login name");
            return Ok(ImportAction::Skipped);
        }

        if let Some(user_id) = self.store.find_user_by_login(&login)? {
            debug!(old_id = %author.id, login = %login, "user already exists");
            return self.reuse_user(author, user_id);
        }

        let password = match author.password.trim() {
            "" | "(none)" => random_password()?,
            _ => author.password.clone(),
        };
        let registered = parse_timestamp(&author.created_on, self.options.utc_offset)
            .map(|stamp| stamp.gmt)
            .unwrap_or_default();
        let nickname = if author.nickname.trim().is_empty() {
            login.clone()
        } else {
            author.nickname.clone()
        };
        let user = NewUser {
            login: login.clone(),
            password,
            email: author.email.trim().to_lowercase(),
            display_name: nickname.clone(),
            nickname,
            registered,
            role: role_for_status(&author.status).to_string(),
        };
        let user_id = self
            .store
            .create_user(&user)
            .with_context(|| format!("failed to create user `{login}`"))?;
        self.mapping.users.insert(author.id.clone(), user_id);
        info!(old_id = %author.id, login = %login, new_id = user_id, role = %user.role, "created user");
        Ok(ImportAction::Created)
    }

    /// Existing accounts keep their details but take the role of this blog's status.
    fn reuse_user(&mut self, author: &AuthorRecord, user_id: u64) -> Result<ImportAction> {
        let role = role_for_status(&author.status);
        self.store
            .set_user_role(user_id, role)
            .with_context(|| format!("failed to set role of user {user_id}"))?;
        self.mapping.users.insert(author.id.clone(), user_id);
        Ok(ImportAction::Existing)
    }

    fn import_post(&mut self, entry: &EntryRecord) -> Result<ImportAction> {
        let mut content = entry.text.clone();
        if !entry.text_more.trim().is_empty() {
            content.push_str(MORE_SEPARATOR);
            content.push_str(&entry.text_more);
        }
        let (content, broken) =
            rewrite_content(&content, &self.site, &self.options, &mut *self.fetcher);
        self.broken.extend(broken);

        let authored = self.timestamp(&entry.authored_on, &entry.id);
        let modified = self.timestamp(&entry.modified_on, &entry.id);
        let post = NewPost {
            title: entry.title.clone(),
            slug: entry.basename.replace('_', &self.options.slug_separator),
            content,
            status: if entry.status.trim() == "2" {
                "publish"
            } else {
                "draft"
            }
            .to_string(),
            author: self.mapping.user(&entry.author_id),
            date: authored.local.clone(),
            date_gmt: authored.gmt,
            modified: modified.local,
            modified_gmt: modified.gmt,
            comment_status: open_or_closed(&entry.allow_comments).to_string(),
            ping_status: open_or_closed(&entry.allow_pings).to_string(),
        };

        if let Some(post_id) = self.store.find_post(&post.title, &post.date)? {
            info!(old_id = %entry.id, new_id = post_id, title = %post.title, "post already exists");
            self.mapping.posts.insert(entry.id.clone(), post_id);
            return Ok(ImportAction::Existing);
        }
        let post_id = self
            .store
            .create_post(&post)
            .with_context(|| format!("failed to create post `{}`", post.title))?;
        info!(old_id = %entry.id, new_id = post_id, title = %post.title, "imported post");
        self.mapping.posts.insert(entry.id.clone(), post_id);
        Ok(ImportAction::Created)
    }

    fn import_tag(&mut self, tag: &TagRecord) -> ImportAction {
        let name = tag.name.trim();
        if name.is_empty() {
            debug!(old_id = %tag.id, "tag has no name");
            return ImportAction::Skipped;
        }
        self.mapping.tags.insert(tag.id.clone(), name.to_string());
        ImportAction::Created
    }

    fn import_category(&mut self, category: &CategoryRecord) -> Result<ImportAction> {
        let slug = category.basename.trim();
        if let Some(category_id) = self.store.find_category_by_slug(slug)? {
            debug!(old_id = %category.id, slug = %slug, "category already exists");
            self.mapping.categories.insert(category.id.clone(), category_id);
            return Ok(ImportAction::Existing);
        }
        let parent = match category.parent.trim() {
            "" | "0" => None,
            parent => {
                let mapped = self.mapping.category(parent);
                if mapped.is_none() {
                    warn!(old_id = %category.id, parent = %parent, "parent category not imported");
                }
                mapped
            }
        };
        let label = if category.label.trim().is_empty() {
            slug
        } else {
            category.label.trim()
        };
        let category_id = self
            .store
            .create_category(label, slug, parent)
            .with_context(|| format!("failed to create category `{slug}`"))?;
        info!(old_id = %category.id, new_id = category_id, slug = %slug, "created category");
        self.mapping.categories.insert(category.id.clone(), category_id);
        Ok(ImportAction::Created)
    }

    fn import_placement(&mut self, placement: &PlacementRecord) -> Result<ImportAction> {
        let (Some(post_id), Some(category_id)) = (
            self.mapping.post(&placement.entry_id),
            self.mapping.category(&placement.category_id),
        ) else {
            warn!(
                old_id = %placement.id,
                entry_id = %placement.entry_id,
                category_id = %placement.category_id,
                "placement references an entry or category that was not imported"
            );
            return Ok(ImportAction::Skipped);
        };
        let append = match self.options.placement_policy {
            PlacementPolicy::Replace => false,
            PlacementPolicy::AppendUnlessUncategorized => {
                let current = self.store.post_category_names(post_id)?;
                current.first().is_some_and(|first| first != UNCATEGORIZED)
            }
        };
        self.store
            .set_post_categories(post_id, &[category_id], append)
            .with_context(|| format!("failed to place post {post_id} in category {category_id}"))?;
        debug!(post = post_id, category = category_id, append, "placed post");
        Ok(ImportAction::Created)
    }

    fn import_object_tag(&mut self, object_tag: &ObjectTagRecord) -> Result<ImportAction> {
        if object_tag.object_datasource != "entry" {
            return Ok(ImportAction::Skipped);
        }
        let (Some(post_id), Some(tag)) = (
            self.mapping.post(&object_tag.object_id),
            self.mapping.tag(&object_tag.tag_id).map(str::to_string),
        ) else {
            warn!(
                old_id = %object_tag.id,
                object_id = %object_tag.object_id,
                tag_id = %object_tag.tag_id,
                "object tag references an entry or tag that was not imported"
            );
            return Ok(ImportAction::Skipped);
        };
        self.store
            .add_post_tags(post_id, std::slice::from_ref(&tag))
            .with_context(|| format!("failed to tag post {post_id} with `{tag}`"))?;
        Ok(ImportAction::Created)
    }

    fn import_object_asset(&mut self, object_asset: &ObjectAssetRecord) -> Result<ImportAction> {
        if object_asset.object_ds != "entry" {
            return Ok(ImportAction::Skipped);
        }
        let (Some(asset), Some(post_id)) = (
            self.mapping.asset(&object_asset.asset_id).map(|asset| asset.id),
            self.mapping.post(&object_asset.object_id),
        ) else {
            warn!(
                old_id = %object_asset.id,
                asset_id = %object_asset.asset_id,
                object_id = %object_asset.object_id,
                "object asset references an asset or entry that was not imported"
            );
            return Ok(ImportAction::Skipped);
        };
        self.store
            .set_attachment_parent(asset, post_id)
            .with_context(|| format!("failed to attach asset {asset} to post {post_id}"))?;
        Ok(ImportAction::Created)
    }

    fn import_comment(&mut self, comment: &CommentRecord) -> Result<ImportAction> {
        if comment.junk_status.trim() != "1" {
            debug!(old_id = %comment.id, junk_status = %comment.junk_status, "skipping junk comment");
            return Ok(ImportAction::Skipped);
        }
        let created = self.timestamp(&comment.created_on, &comment.id);
        let new_comment = NewComment {
            post: 0,
            author: comment.author.clone(),
            author_email: comment.email.clone(),
            author_url: comment.url.clone(),
            author_ip: comment.ip.clone(),
            date: created.local,
            date_gmt: created.gmt,
            content: comment.text.clone(),
            approved: comment.visible.trim() != "0",
            comment_type: "comment".to_string(),
        };
        self.insert_comment(new_comment, &comment.id, &comment.entry_id)
    }

    fn import_trackback(&mut self, trackback: &TrackbackRecord) -> Result<ImportAction> {
        if !self.options.import_trackbacks {
            return Ok(ImportAction::Skipped);
        }
        let created = self.timestamp(&trackback.created_on, &trackback.id);
        let author = if trackback.title.trim().is_empty() {
            trackback.url.clone()
        } else {
            trackback.title.clone()
        };
        let ping = NewComment {
            post: 0,
            author,
            author_email: String::new(),
            author_url: trackback.url.clone(),
            author_ip: String::new(),
            date: created.local,
            date_gmt: created.gmt,
            content: format!(
                "<strong>{}</strong>\n\n{}",
                trackback.title, trackback.description
            ),
            approved: trackback.is_disabled.trim() != "1",
            comment_type: "trackback".to_string(),
        };
        self.insert_comment(ping, &trackback.id, &trackback.entry_id)
    }

    fn insert_comment(
        &mut self,
        mut comment: NewComment,
        old_id: &str,
        entry_id: &str,
    ) -> Result<ImportAction> {
        if self.store.comment_exists(&comment.author, &comment.date)? {
            debug!(old_id = %old_id, author = %comment.author, date = %comment.date, "comment already exists");
            return Ok(ImportAction::Existing);
        }
        let Some(post_id) = self.mapping.post(entry_id) else {
            warn!(old_id = %old_id, entry_id = %entry_id, "comment references an entry that was not imported");
            return Ok(ImportAction::Skipped);
        };
        comment.post = post_id;
        let comment_id = self
            .store
            .create_comment(&comment)
            .with_context(|| format!("failed to create comment {old_id}"))?;
        debug!(old_id = %old_id, new_id = comment_id, post = post_id, "imported comment");
        Ok(ImportAction::Created)
    }

    fn import_asset(&mut self, asset: &AssetRecord) -> Result<ImportAction> {
        if !matches!(asset.parent.trim(), "" | "0") {
            debug!(old_id = %asset.id, parent = %asset.parent, "skipping derived thumbnail");
            return Ok(ImportAction::Skipped);
        }
        let old_url = self.old_asset_url(&asset.url);
        let mime_type = if asset.mime_type.trim().is_empty() {
            mime_from_extension(&asset.file_name).to_string()
        } else {
            asset.mime_type.trim().to_string()
        };
        let title = strip_extension(if asset.label.trim().is_empty() {
            asset.file_name.trim()
        } else {
            asset.label.trim()
        })
        .to_string();
        let created = self.timestamp(&asset.created_on, &asset.id);

        if let Some(existing) = self.store.find_attachment(&title, &created.local)? {
            debug!(old_id = %asset.id, new_id = existing.id, title = %title, "attachment already exists");
            let new_url = Some(existing.url).filter(|url| !url.is_empty());
            if let Some(url) = &new_url {
                let staged_name = staged_name(asset);
                if *url != public_url(&self.site.upload_url, &staged_name) {
                    let local = self.site.upload_dir.join(&staged_name);
                    self.register_upload(&local, url);
                }
            }
            self.map_asset(&asset.id, existing.id, new_url, old_url);
            return Ok(ImportAction::Existing);
        }

        let Some((path, url)) = self.resolve_asset_file(asset, old_url.as_deref())? else {
            warn!(old_id = %asset.id, file = %asset.file_name, "asset file not staged and not downloadable");
            if let Some(old_url) = &old_url {
                self.broken.push(BrokenResource {
                    kind: BrokenKind::Link,
                    url: old_url.clone(),
                });
            }
            return Ok(ImportAction::Skipped);
        };
        let attachment = NewAttachment {
            path,
            url,
            title: title.clone(),
            mime_type,
            author: self.mapping.user(&asset.created_by),
            date: created.local,
            date_gmt: created.gmt,
        };
        let created_ref = self
            .store
            .create_attachment(&attachment)
            .with_context(|| format!("failed to create attachment `{title}`"))?;
        info!(old_id = %asset.id, new_id = created_ref.id, url = %created_ref.url, "imported asset");
        if !created_ref.url.is_empty() && created_ref.url != attachment.url {
            self.register_upload(&attachment.path, &created_ref.url);
        }
        self.map_asset(&asset.id, created_ref.id, Some(created_ref.url), old_url);
        Ok(ImportAction::Created)
    }

    fn map_asset(
        &mut self,
        old_id: &str,
        id: u64,
        new_url: Option<String>,
        old_url: Option<String>,
    ) {
        if let (Some(new_url), Some(old_url)) = (&new_url, &old_url)
            && new_url != old_url
        {
            self.backfill_asset_url(old_url, new_url);
        }
        self.mapping.assets.insert(
            old_id.to_string(),
            AssetMapping {
                id,
                new_url,
                old_url,
            },
        );
    }

    /// The store keeps its own copy of this upload under `url`. Later rewrites point
    /// there and the local copy in the upload dir is removed.
    fn register_upload(&mut self, local: &Path, url: &str) {
        let Some(name) = local.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            return;
        };
        self.site.registered.insert(
            name,
            RegisteredAsset {
                url: url.to_string(),
                dimensions: file_dimensions(local),
            },
        );
        if self.dry_run || !local.starts_with(&self.site.upload_dir) || !local.is_file() {
            return;
        }
        match fs::remove_file(local) {
            Ok(()) => debug!(path = %local.display(), url = %url, "removed local copy"),
            Err(err) => warn!(path = %local.display(), error = %err, "could not remove local copy"),
        }
    }

    /// Replace `old_url` with `new_url` in every post imported so far.
    fn backfill_asset_url(&mut self, old_url: &str, new_url: &str) {
        let posts = self.mapping.posts.values().copied().collect::<BTreeSet<_>>();
        for post_id in posts {
            let result = self.store.post_content(post_id).and_then(|content| {
                if content.contains(old_url) {
                    self.store
                        .update_post_content(post_id, &content.replace(old_url, new_url))?;
                    debug!(post = post_id, old = %old_url, new = %new_url, "backfilled asset url");
                }
                Ok(())
            });
            if let Err(err) = result {
                warn!(post = post_id, error = %format!("{err:#}"), "could not backfill asset url");
            }
        }
    }

    /// `%r/` expands to the old site URL; relative URLs are made absolute against it.
    fn old_asset_url(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        let expanded = url.replace("%r/", &self.site.old_site_url);
        if expanded.to_ascii_lowercase().starts_with("http") {
            return Some(expanded);
        }
        if self.site.old_site_url.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}",
            self.site.old_site_url,
            expanded.trim_start_matches('/')
        ))
    }

    /// Staged `{id}-{file_name}` first (moved into the upload dir), then a download.
    fn resolve_asset_file(
        &mut self,
        asset: &AssetRecord,
        old_url: Option<&str>,
    ) -> Result<Option<(PathBuf, String)>> {
        let staged_name = staged_name(asset);
        let staged = self.staging_dir.join(&staged_name);
        let uploaded = self.site.upload_dir.join(&staged_name);
        if uploaded.is_file() {
            return Ok(Some((
                uploaded,
                public_url(&self.site.upload_url, &staged_name),
            )));
        }
        if staged.is_file() {
            if self.dry_run {
                return Ok(Some((
                    staged,
                    public_url(&self.site.upload_url, &staged_name),
                )));
            }
            move_file(&staged, &uploaded)?;
            debug!(from = %staged.display(), to = %uploaded.display(), "moved staged asset");
            return Ok(Some((
                uploaded,
                public_url(&self.site.upload_url, &staged_name),
            )));
        }
        let Some(old_url) = old_url else {
            return Ok(None);
        };
        Ok(download_resource(
            &mut *self.fetcher,
            old_url,
            &self.site.upload_dir,
            &self.site.upload_url,
        )
        .map(|downloaded| (downloaded.path, downloaded.url)))
    }

    fn timestamp(&self, value: &str, old_id: &str) -> Timestamp {
        match parse_timestamp(value, self.options.utc_offset) {
            Some(stamp) => stamp,
            None => {
                if !value.trim().is_empty() {
                    warn!(old_id = %old_id, value = %value, "unrecognised timestamp");
                }
                Timestamp::default()
            }
        }
    }
}

/// A backup timestamp in site-local time and in UTC, both `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub local: String,
    pub gmt: String,
}

/// Backup timestamps are wall-clock times of the blog's timezone.
pub fn parse_timestamp(value: &str, offset: FixedOffset) -> Option<Timestamp> {
    let value = value.trim();
    let naive = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())?;
    let local = offset.from_local_datetime(&naive).single()?;
    Some(Timestamp {
        local: naive.format(STORE_FORMAT).to_string(),
        gmt: local.with_timezone(&Utc).format(STORE_FORMAT).to_string(),
    })
}

/// Status `1` is an active author; everyone else only gets to read.
pub fn role_for_status(status: &str) -> &'static str {
    if status.trim() == "1" {
        "editor"
    } else {
        "subscriber"
    }
}

pub fn random_password() -> Result<String> {
    let mut bytes = [0u8; PASSWORD_LENGTH];
    getrandom::fill(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to generate a password: {err}"))?;
    Ok(bytes
        .iter()
        .map(|byte| char::from(PASSWORD_ALPHABET[usize::from(*byte) % PASSWORD_ALPHABET.len()]))
        .collect())
}

/// `{id}-{file_name}`, the name assets are staged and uploaded under.
fn staged_name(asset: &AssetRecord) -> String {
    format!("{}-{}", asset.id, asset.file_name.trim())
}

fn open_or_closed(flag: &str) -> &'static str {
    if flag.trim() == "1" { "open" } else { "closed" }
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => &name[..pos],
        _ => name,
    }
}

pub fn mime_from_extension(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/avi",
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("failed to remove {}", from.display()))?;
    Ok(())
}
