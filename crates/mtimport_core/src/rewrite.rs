//! Rewrites image tags and asset links in post bodies so they point at the new site.
//!
//! Images are resolved first, links second. Each pass is a plain function over
//! the body that returns the new body together with the resources it could not
//! resolve.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ImportOptions;
use crate::fetch::{ResourceFetcher, decoded_basename, download_resource, public_url};
use crate::image_size::file_dimensions;

static RE_IMAGE: OnceLock<Regex> = OnceLock::new();
static RE_LINK: OnceLock<Regex> = OnceLock::new();
static RE_WIDTH: OnceLock<Regex> = OnceLock::new();
static RE_HEIGHT: OnceLock<Regex> = OnceLock::new();
static RE_ALT: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokenKind {
    Image,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenResource {
    pub kind: BrokenKind,
    pub url: String,
}

/// Where old content lives and where the new copies go.
#[derive(Debug, Clone, Default)]
pub struct SiteContext {
    /// Old site base URL, with trailing slash. Empty until the `blog` element is seen.
    pub old_site_url: String,
    /// New site home URL, without trailing slash.
    pub home_url: String,
    pub upload_dir: PathBuf,
    /// New upload URL, with trailing slash.
    pub upload_url: String,
    /// Searched after `upload_dir` for originals that are never moved (dry runs).
    pub staging_dir: Option<PathBuf>,
    /// Upload file name to the copy the store registered and serves instead.
    pub registered: BTreeMap<String, RegisteredAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredAsset {
    pub url: String,
    pub dimensions: Option<(u32, u32)>,
}

impl SiteContext {
    /// First registered upload (by name) called `*-{name}`.
    pub fn registered_asset(&self, name: &str) -> Option<(&str, &RegisteredAsset)> {
        let suffix = format!("-{name}");
        self.registered
            .iter()
            .find(|(local, _)| local.len() > suffix.len() && local.ends_with(&suffix))
            .map(|(local, asset)| (local.as_str(), asset))
    }
}

/// A resolved original: its upload file name, public URL and pixel size if known.
struct Original {
    name: String,
    url: String,
    dimensions: Option<(u32, u32)>,
}

struct Rewriter<'a, F: ResourceFetcher + ?Sized> {
    site: &'a SiteContext,
    options: &'a ImportOptions,
    fetcher: &'a mut F,
    broken: Vec<BrokenResource>,
}

/// Rewrite `body` in two passes and report what could not be resolved.
pub fn rewrite_content<F>(
    body: &str,
    site: &SiteContext,
    options: &ImportOptions,
    fetcher: &mut F,
) -> (String, Vec<BrokenResource>)
where
    F: ResourceFetcher + ?Sized,
{
    if body.is_empty() || site.old_site_url.is_empty() {
        return (body.to_string(), Vec::new());
    }
    let mut rewriter = Rewriter {
        site,
        options,
        fetcher,
        broken: Vec::new(),
    };
    let body = rewriter.rewrite_images(body);
    let body = rewriter.rewrite_links(&body);
    (body, rewriter.broken)
}

impl<F: ResourceFetcher + ?Sized> Rewriter<'_, F> {
    fn rewrite_images(&mut self, body: &str) -> String {
        let re = RE_IMAGE.get_or_init(|| {
            Regex::new(r#"(?is)<img\b[^>]*?\bsrc="([^"]*)"[^>]*>"#).expect("valid image regex")
        });
        replace_each(re, body, |caps| self.rewrite_image(caps))
    }

    fn rewrite_links(&mut self, body: &str) -> String {
        let re = RE_LINK.get_or_init(|| {
            Regex::new(r#"(?is)<a\b[^>]*?\bhref="([^"]*)"[^>]*>(.*?)</a\s*>"#)
                .expect("valid link regex")
        });
        replace_each(re, body, |caps| self.rewrite_link(caps))
    }

    fn rewrite_image(&mut self, caps: &Captures<'_>) -> Option<String> {
        let tag = caps.get(0)?.as_str();
        let src = caps.get(1)?.as_str();
        if !self.is_old_site_url(src) {
            return None;
        }
        let mut sizing = declared_sizing(tag);
        let alt = attribute(&RE_ALT, r#"(?is)\balt="([^"]*)""#, tag);

        if let Some(original) = self.staged_original(src) {
            if self.options.autosizing
                && let Some(autosized) = original.dimensions.and_then(|size| self.autosized(size))
            {
                sizing = autosized;
            }
            debug!(old = %src, new = %original.url, "rewrote image to staged original");
            return Some(image_tag(
                &original.url,
                alt.as_deref().unwrap_or(&original.name),
                &sizing,
            ));
        }

        match download_resource(
            &mut *self.fetcher,
            src,
            &self.site.upload_dir,
            &self.site.upload_url,
        ) {
            Some(downloaded) => {
                let name = file_name(&downloaded.path);
                Some(image_tag(
                    &downloaded.url,
                    alt.as_deref().unwrap_or(&name),
                    &sizing,
                ))
            }
            None => {
                warn!(url = %src, "broken image");
                self.broken.push(BrokenResource {
                    kind: BrokenKind::Image,
                    url: src.to_string(),
                });
                None
            }
        }
    }

    fn rewrite_link(&mut self, caps: &Captures<'_>) -> Option<String> {
        let href = caps.get(1)?.as_str();
        let text = caps.get(2).map_or("", |inner| inner.as_str());
        if !(href.contains("/assets_c/") || href.contains("/upload/")) || !self.is_old_site_url(href)
        {
            return None;
        }

        if let Some(original) = self.staged_original(href) {
            if href.contains("/assets_c/") && original.name.to_ascii_lowercase().ends_with(".html") {
                debug!(url = %href, "unwrapped popup link");
                return Some(text.to_string());
            }
            return Some(link_tag(&original.url, text));
        }

        let substituted = href.replacen(
            self.site.old_site_url.as_str(),
            &format!("{}/", self.site.home_url.trim_end_matches('/')),
            1,
        );
        if substituted.to_ascii_lowercase().ends_with(".html") || !decoded_basename(href).contains('.')
        {
            return Some(link_tag(&substituted, text));
        }

        let mut target = href.to_string();
        if href.contains(".php") {
            let candidate = href.replace(".php", ".jpg");
            if self.fetcher.exists(&candidate) {
                debug!(old = %href, guess = %candidate, "script link resolved to image");
                target = candidate;
            }
        }
        match download_resource(
            &mut *self.fetcher,
            &target,
            &self.site.upload_dir,
            &self.site.upload_url,
        ) {
            Some(downloaded) => Some(link_tag(&downloaded.url, text)),
            None => {
                warn!(url = %target, "broken link");
                self.broken.push(BrokenResource {
                    kind: BrokenKind::Link,
                    url: target,
                });
                None
            }
        }
    }

    /// Under the old site, and not already pointing into the new upload area or
    /// below a new home that sits inside the old site.
    fn is_old_site_url(&self, url: &str) -> bool {
        let old = self.site.old_site_url.as_str();
        if !url.starts_with(old) || url.starts_with(&self.site.upload_url) {
            return false;
        }
        let home = format!("{}/", self.site.home_url.trim_end_matches('/'));
        !(home.len() > old.len() && home.starts_with(old) && url.starts_with(&home))
    }

    /// Registered copies first, then `*-{name}` in the upload dir, then in the staging dir.
    fn staged_original(&self, url: &str) -> Option<Original> {
        let name = decoded_basename(url);
        if let Some((local, asset)) = self.site.registered_asset(&name) {
            return Some(Original {
                name: local.to_string(),
                url: asset.url.clone(),
                dimensions: asset.dimensions,
            });
        }
        let path = find_staged_original(&self.site.upload_dir, &name).or_else(|| {
            self.site
                .staging_dir
                .as_deref()
                .and_then(|dir| find_staged_original(dir, &name))
        })?;
        let name = file_name(&path);
        Some(Original {
            url: public_url(&self.site.upload_url, &name),
            dimensions: if self.options.autosizing {
                file_dimensions(&path)
            } else {
                None
            },
            name,
        })
    }

    fn autosized(&self, (width, height): (u32, u32)) -> Option<String> {
        if width == 0 || height == 0 || width < self.options.content_width_upscale {
            return None;
        }
        let target = self.options.content_width;
        let scaled = (f64::from(target) * f64::from(height) / f64::from(width)).round() as u64;
        Some(format!(" width=\"{target}\" height=\"{scaled}\""))
    }
}

/// Replace every match with `rewrite`'s output; `None` keeps the match as is.
fn replace_each<R>(re: &Regex, text: &str, mut rewrite: R) -> String
where
    R: FnMut(&Captures<'_>) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        match rewrite(&caps) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// First file in `upload_dir` (by name) called `*-{name}`.
pub fn find_staged_original(upload_dir: &Path, name: &str) -> Option<PathBuf> {
    let suffix = format!("-{name}");
    WalkDir::new(upload_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            let file_name = entry.file_name().to_string_lossy();
            file_name.len() > suffix.len() && file_name.ends_with(&suffix)
        })
        .map(|entry| entry.into_path())
}

fn declared_sizing(tag: &str) -> String {
    let mut sizing = String::new();
    if let Some(width) = attribute(&RE_WIDTH, r#"(?is)\bwidth="(\d+)""#, tag) {
        sizing.push_str(&format!(" width=\"{width}\""));
    }
    if let Some(height) = attribute(&RE_HEIGHT, r#"(?is)\bheight="(\d+)""#, tag) {
        sizing.push_str(&format!(" height=\"{height}\""));
    }
    sizing
}

fn attribute(cell: &OnceLock<Regex>, pattern: &str, tag: &str) -> Option<String> {
    let re = cell.get_or_init(|| Regex::new(pattern).expect("valid attribute regex"));
    re.captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
}

fn image_tag(url: &str, alt: &str, sizing: &str) -> String {
    format!(
        "<img src=\"{url}\" alt=\"{}\"{sizing} />",
        alt.replace('"', "&quot;")
    )
}

fn link_tag(url: &str, text: &str) -> String {
    format!("<a href=\"{url}\">{text}</a>")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::fetch::download_file_name;
    use crate::fetch::tests::ScriptedFetcher;
    use crate::image_size::tests::png_header;

    fn site(temp: &TempDir) -> SiteContext {
        SiteContext {
            old_site_url: "http://old.example/".to_string(),
            home_url: "https://new.example".to_string(),
            upload_dir: temp.path().to_path_buf(),
            upload_url: "https://new.example/wp-content/uploads/".to_string(),
            ..SiteContext::default()
        }
    }

    #[test]
    fn staged_image_is_pointed_at_new_upload() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("12-foo.jpg"), b"jpeg").expect("stage");
        let body = r#"<p><img src="http://old.example/upload/foo.jpg" width="300" height="200" /></p>"#;
        let (out, broken) = rewrite_content(
            body,
            &site(&temp),
            &ImportOptions::default(),
            &mut ScriptedFetcher::default(),
        );
        assert_eq!(
            out,
            r#"<p><img src="https://new.example/wp-content/uploads/12-foo.jpg" alt="12-foo.jpg" width="300" height="200" /></p>"#
        );
        assert!(!out.contains("http://old.example/"));
        assert!(broken.is_empty());
    }

    #[test]
    fn rewriting_twice_is_stable() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("12-foo.jpg"), b"jpeg").expect("stage");
        fs::write(temp.path().join("14-popup.html"), b"<html/>").expect("stage");
        let body = concat!(
            r#"<img alt="Foo" src="http://old.example/upload/foo.jpg">"#,
            r#" <a href="http://old.example/assets_c/popup.html">view</a>"#,
            r#" <a href="http://old.example/upload/about">about</a>"#,
            r#" <a href="http://elsewhere.example/upload/x.jpg">x</a>"#,
        );
        let options = ImportOptions::default();
        let mut fetcher = ScriptedFetcher::default();
        let (first, _) = rewrite_content(body, &site(&temp), &options, &mut fetcher);
        let (second, broken) = rewrite_content(&first, &site(&temp), &options, &mut fetcher);
        assert_eq!(first, second);
        assert!(broken.is_empty());
        assert!(first.contains(r#"alt="Foo""#));
        assert!(first.contains(" view "));
        assert!(first.contains(r#"<a href="https://new.example/upload/about">about</a>"#));
        assert!(first.contains("http://elsewhere.example/upload/x.jpg"));
    }

    #[test]
    fn shared_host_rewrite_is_stable() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("12-foo.jpg"), b"jpeg").expect("stage");
        let context = SiteContext {
            old_site_url: "https://blog.example/".to_string(),
            home_url: "https://blog.example".to_string(),
            upload_dir: temp.path().to_path_buf(),
            upload_url: "https://blog.example/wp-content/uploads/".to_string(),
            ..SiteContext::default()
        };
        let body = r#"<img src="https://blog.example/upload/foo.jpg">"#;
        let options = ImportOptions::default();
        let mut fetcher = ScriptedFetcher::default();
        let (first, _) = rewrite_content(body, &context, &options, &mut fetcher);
        let (second, _) = rewrite_content(&first, &context, &options, &mut fetcher);
        assert!(first.contains("https://blog.example/wp-content/uploads/12-foo.jpg"));
        assert_eq!(first, second);
    }

    #[test]
    fn subdirectory_home_rewrite_is_stable() {
        let temp = tempdir().expect("tempdir");
        let context = SiteContext {
            old_site_url: "http://example.com/".to_string(),
            home_url: "http://example.com/blog".to_string(),
            upload_dir: temp.path().to_path_buf(),
            upload_url: "http://example.com/blog/wp-content/uploads/".to_string(),
            ..SiteContext::default()
        };
        let body = r#"<a href="http://example.com/upload/about">about</a>"#;
        let options = ImportOptions::default();
        let mut fetcher = ScriptedFetcher::default();
        let (first, _) = rewrite_content(body, &context, &options, &mut fetcher);
        let (second, broken) = rewrite_content(&first, &context, &options, &mut fetcher);
        assert_eq!(
            first,
            r#"<a href="http://example.com/blog/upload/about">about</a>"#
        );
        assert_eq!(first, second);
        assert!(broken.is_empty());
    }

    #[test]
    fn registered_copies_win_over_local_files() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("12-foo.jpg"), b"jpeg").expect("stage");
        let mut context = site(&temp);
        context.registered.insert(
            "12-foo.jpg".to_string(),
            RegisteredAsset {
                url: "https://new.example/wp-content/uploads/2026/10/12-foo.jpg".to_string(),
                dimensions: Some((1100, 400)),
            },
        );
        let options = ImportOptions {
            autosizing: true,
            ..ImportOptions::default()
        };
        let body = r#"<img src="http://old.example/upload/foo.jpg"> <a href="http://old.example/upload/foo.jpg">big</a>"#;
        let (out, broken) =
            rewrite_content(body, &context, &options, &mut ScriptedFetcher::default());
        assert!(broken.is_empty());
        assert_eq!(
            out,
            concat!(
                r#"<img src="https://new.example/wp-content/uploads/2026/10/12-foo.jpg" alt="12-foo.jpg" width="550" height="200" />"#,
                r#" <a href="https://new.example/wp-content/uploads/2026/10/12-foo.jpg">big</a>"#,
            )
        );
    }

    #[test]
    fn originals_left_in_staging_are_found() {
        let temp = tempdir().expect("tempdir");
        let staging = tempdir().expect("staging");
        fs::write(staging.path().join("12-foo.jpg"), b"jpeg").expect("stage");
        let mut context = site(&temp);
        context.staging_dir = Some(staging.path().to_path_buf());
        let body = r#"<img src="http://old.example/upload/foo.jpg">"#;
        let mut fetcher = ScriptedFetcher::default();
        let (out, broken) =
            rewrite_content(body, &context, &ImportOptions::default(), &mut fetcher);
        assert!(broken.is_empty());
        assert!(fetcher.fetched.is_empty());
        assert_eq!(
            out,
            r#"<img src="https://new.example/wp-content/uploads/12-foo.jpg" alt="12-foo.jpg" />"#
        );
    }

    #[test]
    fn missing_image_with_failed_download_is_left_and_reported() {
        let temp = tempdir().expect("tempdir");
        let body = r#"<img src="http://old.example/upload/foo.jpg">"#;
        let mut fetcher = ScriptedFetcher::default();
        let (out, broken) =
            rewrite_content(body, &site(&temp), &ImportOptions::default(), &mut fetcher);
        assert_eq!(out, body);
        assert_eq!(
            broken,
            vec![BrokenResource {
                kind: BrokenKind::Image,
                url: "http://old.example/upload/foo.jpg".to_string(),
            }]
        );
        assert_eq!(fetcher.fetched, vec!["http://old.example/upload/foo.jpg".to_string()]);
    }

    #[test]
    fn missing_image_is_downloaded() {
        let temp = tempdir().expect("tempdir");
        let url = "http://old.example/upload/bar.png";
        let mut fetcher = ScriptedFetcher::serving(url, b"png");
        let body = format!(r#"<img src="{url}" width="40">"#);
        let (out, broken) =
            rewrite_content(&body, &site(&temp), &ImportOptions::default(), &mut fetcher);
        let name = download_file_name(url);
        assert!(broken.is_empty());
        assert_eq!(
            out,
            format!(
                r#"<img src="https://new.example/wp-content/uploads/{name}" alt="{name}" width="40" />"#
            )
        );
        assert!(temp.path().join(&name).is_file());
    }

    #[test]
    fn wide_images_are_autosized() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("3-wide.png"), png_header(1100, 400)).expect("stage");
        fs::write(temp.path().join("4-small.png"), png_header(300, 100)).expect("stage");
        let options = ImportOptions {
            autosizing: true,
            ..ImportOptions::default()
        };
        let body = r#"<img src="http://old.example/upload/wide.png" width="1100" height="400"><img src="http://old.example/upload/small.png" width="300" height="100">"#;
        let (out, _) = rewrite_content(
            body,
            &site(&temp),
            &options,
            &mut ScriptedFetcher::default(),
        );
        assert!(out.contains(r#"3-wide.png" alt="3-wide.png" width="550" height="200" />"#));
        assert!(out.contains(r#"4-small.png" alt="4-small.png" width="300" height="100" />"#));
    }

    #[test]
    fn staged_link_targets_are_rewritten() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("7-report.pdf"), b"pdf").expect("stage");
        let body = r#"<a class="x" href="http://old.example/upload/report.pdf">Report</a>"#;
        let (out, _) = rewrite_content(
            body,
            &site(&temp),
            &ImportOptions::default(),
            &mut ScriptedFetcher::default(),
        );
        assert_eq!(
            out,
            r#"<a href="https://new.example/wp-content/uploads/7-report.pdf">Report</a>"#
        );
    }

    #[test]
    fn script_links_are_probed_as_images() {
        let temp = tempdir().expect("tempdir");
        let guessed = "http://old.example/assets_c/pic.jpg";
        let mut fetcher = ScriptedFetcher::serving(guessed, b"jpeg");
        let body = r#"<a href="http://old.example/assets_c/pic.php">pic</a>"#;
        let (out, broken) =
            rewrite_content(body, &site(&temp), &ImportOptions::default(), &mut fetcher);
        assert!(broken.is_empty());
        assert_eq!(fetcher.probed, vec![guessed.to_string()]);
        assert_eq!(
            out,
            format!(
                r#"<a href="https://new.example/wp-content/uploads/{}">pic</a>"#,
                download_file_name(guessed)
            )
        );
    }

    #[test]
    fn unresolvable_links_are_reported() {
        let temp = tempdir().expect("tempdir");
        let body = r#"<a href="http://old.example/upload/gone.zip">zip</a>"#;
        let (out, broken) = rewrite_content(
            body,
            &site(&temp),
            &ImportOptions::default(),
            &mut ScriptedFetcher::default(),
        );
        assert_eq!(out, body);
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].kind, BrokenKind::Link);
    }

    #[test]
    fn nothing_is_rewritten_before_the_old_site_is_known() {
        let temp = tempdir().expect("tempdir");
        let mut context = site(&temp);
        context.old_site_url.clear();
        let body = r#"<img src="http://old.example/upload/foo.jpg">"#;
        let (out, broken) = rewrite_content(
            body,
            &context,
            &ImportOptions::default(),
            &mut ScriptedFetcher::default(),
        );
        assert_eq!(out, body);
        assert!(broken.is_empty());
    }
}
