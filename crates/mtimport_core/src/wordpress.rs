use std::env;
use std::fs;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ImporterConfig;
use crate::runtime::SiteTarget;
use crate::store::{AttachmentRef, ContentStore, NewAttachment, NewComment, NewPost, NewUser};

const PER_PAGE: &str = "100";

#[derive(Debug, Clone)]
pub struct WordPressClientConfig {
    pub site_url: String,
    pub user: Option<String>,
    pub app_password: Option<String>,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl WordPressClientConfig {
    /// Credentials come from `WP_USER` / `WP_APP_PASSWORD` only; they are never
    /// read from the config file.
    pub fn from_config(config: &ImporterConfig, target: &SiteTarget) -> Self {
        Self {
            site_url: target.url.clone(),
            user: env_non_empty("WP_USER"),
            app_password: env_non_empty("WP_APP_PASSWORD"),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            rate_limit_ms: config.rate_limit_ms(),
            max_retries: config.retries(),
            retry_delay_ms: config.retry_delay_ms(),
        }
    }
}

enum Payload {
    Empty,
    Json(Value),
    File {
        bytes: Vec<u8>,
        mime_type: String,
        file_name: String,
    },
}

/// [`ContentStore`] backed by the WordPress REST API (`/wp-json/wp/v2`).
pub struct WordPressClient {
    client: Client,
    config: WordPressClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    home_url: Option<String>,
}

impl WordPressClient {
    pub fn new(config: WordPressClientConfig) -> Result<Self> {
        if config.user.is_none() || config.app_password.is_none() {
            warn!("WP_USER / WP_APP_PASSWORD not set; write requests will be rejected");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build WordPress HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            home_url: None,
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/wp-json/wp/v2/{}",
            self.config.site_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn get(&mut self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path);
        self.send(false, &url, query, &Payload::Empty)
    }

    fn post_json(&mut self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path);
        self.send(true, &url, &[], &Payload::Json(body))
    }

    fn send(
        &mut self,
        is_write: bool,
        url: &str,
        query: &[(&str, String)],
        payload: &Payload,
    ) -> Result<Value> {
        let pairs = query
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect::<Vec<_>>();

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let request = self.build_request(is_write, url, &pairs, payload);
            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status, is_write)
                        {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        let body = response.text().unwrap_or_default();
                        bail!("{}", describe_rest_error(status, &body));
                    }
                    return response
                        .json::<Value>()
                        .with_context(|| format!("failed to decode JSON response from {url}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && !is_write && is_retryable_error(&error)
                    {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {url}"));
                }
            }
        }

        bail!("WordPress request exhausted retry budget: {url}")
    }

    fn build_request(
        &self,
        is_write: bool,
        url: &str,
        pairs: &[(String, String)],
        payload: &Payload,
    ) -> RequestBuilder {
        let mut request = if is_write {
            self.client.post(url)
        } else {
            self.client.get(url)
        };
        request = request
            .header("User-Agent", self.config.user_agent.clone())
            .query(pairs);
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.app_password) {
            request = request.basic_auth(user, Some(password));
        }
        match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(body),
            Payload::File {
                bytes,
                mime_type,
                file_name,
            } => request
                .header("Content-Type", mime_type.clone())
                .header(
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
                )
                .body(bytes.clone()),
        }
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn post_term_ids(&mut self, post: u64, field: &str) -> Result<Vec<u64>> {
        let payload = self.get(&format!("posts/{post}"), &[("context", "edit".to_string())])?;
        Ok(id_list(&payload, field))
    }

    fn find_or_create_tag(&mut self, name: &str) -> Result<u64> {
        let found = self.get(
            "tags",
            &[("search", name.to_string()), ("per_page", PER_PAGE.to_string())],
        )?;
        if let Some(id) = items(&found)
            .iter()
            .find(|tag| text_field(tag, "name").eq_ignore_ascii_case(name))
            .and_then(|tag| tag.get("id").and_then(Value::as_u64))
        {
            return Ok(id);
        }
        let created = self.post_json("tags", json!({ "name": name }))?;
        object_id(&created).with_context(|| format!("tag `{name}` was not created"))
    }
}

impl ContentStore for WordPressClient {
    fn home_url(&mut self) -> Result<String> {
        if let Some(home) = &self.home_url {
            return Ok(home.clone());
        }
        let url = format!("{}/wp-json/", self.config.site_url.trim_end_matches('/'));
        let index = self.send(false, &url, &[], &Payload::Empty)?;
        let home = index
            .get("home")
            .and_then(Value::as_str)
            .map(|home| home.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.config.site_url.trim_end_matches('/').to_string());
        self.home_url = Some(home.clone());
        Ok(home)
    }

    fn find_user_by_login(&mut self, login: &str) -> Result<Option<u64>> {
        let found = self.get(
            "users",
            &[
                ("search", login.to_string()),
                ("search_columns", "username".to_string()),
                ("context", "edit".to_string()),
                ("per_page", PER_PAGE.to_string()),
            ],
        )?;
        Ok(items(&found)
            .iter()
            .find(|user| text_field(user, "username") == login)
            .and_then(|user| user.get("id").and_then(Value::as_u64)))
    }

    fn create_user(&mut self, user: &NewUser) -> Result<u64> {
        debug!(login = %user.login, registered = %user.registered, "registration date is not writable over REST");
        let created = self.post_json(
            "users",
            json!({
                "username": user.login,
                "password": user.password,
                "email": user.email,
                "name": user.display_name,
                "nickname": user.nickname,
                "roles": [user.role],
            }),
        )?;
        object_id(&created).with_context(|| format!("user `{}` was not created", user.login))
    }

    fn set_user_role(&mut self, user: u64, role: &str) -> Result<()> {
        self.post_json(&format!("users/{user}"), json!({ "roles": [role] }))?;
        Ok(())
    }

    fn find_category_by_slug(&mut self, slug: &str) -> Result<Option<u64>> {
        let found = self.get("categories", &[("slug", slug.to_string())])?;
        Ok(items(&found)
            .first()
            .and_then(|category| category.get("id").and_then(Value::as_u64)))
    }

    fn create_category(&mut self, label: &str, slug: &str, parent: Option<u64>) -> Result<u64> {
        let mut body = json!({ "name": label, "slug": slug });
        if let Some(parent) = parent {
            body["parent"] = json!(parent);
        }
        let created = self.post_json("categories", body)?;
        object_id(&created).with_context(|| format!("category `{slug}` was not created"))
    }

    fn find_post(&mut self, title: &str, date: &str) -> Result<Option<u64>> {
        let found = self.get(
            "posts",
            &[
                ("search", title.to_string()),
                ("status", "publish,draft,pending,private,future".to_string()),
                ("context", "edit".to_string()),
                ("per_page", PER_PAGE.to_string()),
            ],
        )?;
        let wanted = rest_date(date);
        Ok(items(&found)
            .iter()
            .find(|post| raw_field(post, "title") == title && text_field(post, "date") == wanted)
            .and_then(|post| post.get("id").and_then(Value::as_u64)))
    }

    fn create_post(&mut self, post: &NewPost) -> Result<u64> {
        let mut body = json!({
            "title": post.title,
            "slug": post.slug,
            "content": post.content,
            "status": post.status,
            "date": rest_date(&post.date),
            "date_gmt": rest_date(&post.date_gmt),
            "comment_status": post.comment_status,
            "ping_status": post.ping_status,
        });
        if let Some(author) = post.author {
            body["author"] = json!(author);
        }
        let created = self.post_json("posts", body)?;
        object_id(&created).with_context(|| format!("post `{}` was not created", post.title))
    }

    fn post_content(&mut self, post: u64) -> Result<String> {
        let payload = self.get(&format!("posts/{post}"), &[("context", "edit".to_string())])?;
        Ok(raw_field(&payload, "content"))
    }

    fn update_post_content(&mut self, post: u64, content: &str) -> Result<()> {
        self.post_json(&format!("posts/{post}"), json!({ "content": content }))?;
        Ok(())
    }

    fn post_category_names(&mut self, post: u64) -> Result<Vec<String>> {
        let found = self.get(
            "categories",
            &[("post", post.to_string()), ("per_page", PER_PAGE.to_string())],
        )?;
        Ok(items(&found)
            .iter()
            .map(|category| text_field(category, "name"))
            .collect())
    }

    fn set_post_categories(&mut self, post: u64, categories: &[u64], append: bool) -> Result<()> {
        let mut ids = if append {
            self.post_term_ids(post, "categories")?
        } else {
            Vec::new()
        };
        for id in categories {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        self.post_json(&format!("posts/{post}"), json!({ "categories": ids }))?;
        Ok(())
    }

    fn add_post_tags(&mut self, post: u64, tags: &[String]) -> Result<()> {
        let mut ids = self.post_term_ids(post, "tags")?;
        for name in tags {
            let id = self.find_or_create_tag(name)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.post_json(&format!("posts/{post}"), json!({ "tags": ids }))?;
        Ok(())
    }

    fn find_attachment(&mut self, title: &str, date: &str) -> Result<Option<AttachmentRef>> {
        let found = self.get(
            "media",
            &[
                ("search", title.to_string()),
                ("context", "edit".to_string()),
                ("per_page", PER_PAGE.to_string()),
            ],
        )?;
        let wanted = rest_date(date);
        Ok(items(&found)
            .iter()
            .find(|media| raw_field(media, "title") == title && text_field(media, "date") == wanted)
            .and_then(|media| {
                Some(AttachmentRef {
                    id: media.get("id").and_then(Value::as_u64)?,
                    url: text_field(media, "source_url"),
                })
            }))
    }

    fn create_attachment(&mut self, attachment: &NewAttachment) -> Result<AttachmentRef> {
        let bytes = fs::read(&attachment.path)
            .with_context(|| format!("failed to read {}", attachment.path.display()))?;
        let file_name = attachment
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| attachment.title.clone());
        let mut query = vec![
            ("title", attachment.title.clone()),
            ("date", rest_date(&attachment.date)),
            ("date_gmt", rest_date(&attachment.date_gmt)),
        ];
        if let Some(author) = attachment.author {
            query.push(("author", author.to_string()));
        }
        let url = self.endpoint("media");
        let created = self.send(
            true,
            &url,
            &query,
            &Payload::File {
                bytes,
                mime_type: attachment.mime_type.clone(),
                file_name,
            },
        )?;
        let id = object_id(&created)
            .with_context(|| format!("attachment `{}` was not created", attachment.title))?;
        let source_url = text_field(&created, "source_url");
        Ok(AttachmentRef {
            id,
            url: if source_url.is_empty() {
                attachment.url.clone()
            } else {
                source_url
            },
        })
    }

    fn set_attachment_parent(&mut self, attachment: u64, post: u64) -> Result<()> {
        self.post_json(&format!("media/{attachment}"), json!({ "post": post }))?;
        Ok(())
    }

    fn comment_exists(&mut self, author: &str, date: &str) -> Result<bool> {
        let found = self.get(
            "comments",
            &[
                ("search", author.to_string()),
                ("context", "edit".to_string()),
                ("per_page", PER_PAGE.to_string()),
            ],
        )?;
        let wanted = rest_date(date);
        Ok(items(&found).iter().any(|comment| {
            text_field(comment, "author_name") == author && text_field(comment, "date") == wanted
        }))
    }

    fn create_comment(&mut self, comment: &NewComment) -> Result<u64> {
        let mut body = json!({
            "post": comment.post,
            "author_name": comment.author,
            "author_email": comment.author_email,
            "author_url": comment.author_url,
            "author_ip": comment.author_ip,
            "date": rest_date(&comment.date),
            "date_gmt": rest_date(&comment.date_gmt),
            "content": comment.content,
            "status": if comment.approved { "approved" } else { "hold" },
        });
        if comment.comment_type != "comment" {
            body["type"] = json!(comment.comment_type);
        }
        let created = self.post_json("comments", body)?;
        object_id(&created)
            .with_context(|| format!("comment by `{}` was not created", comment.author))
    }
}

/// `2010-01-01 10:00:00` -> `2010-01-01T10:00:00`, the form REST responses use.
fn rest_date(value: &str) -> String {
    value.trim().replacen(' ', "T", 1)
}

fn items(payload: &Value) -> &[Value] {
    payload.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn object_id(payload: &Value) -> Option<u64> {
    payload.get("id").and_then(Value::as_u64)
}

fn text_field(payload: &Value, field: &str) -> String {
    payload
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Fields such as `title` and `content` are `{raw, rendered}` objects in edit context.
fn raw_field(payload: &Value, field: &str) -> String {
    let Some(value) = payload.get(field) else {
        return String::new();
    };
    value
        .get("raw")
        .or_else(|| value.get("rendered"))
        .and_then(Value::as_str)
        .or_else(|| value.as_str())
        .unwrap_or_default()
        .to_string()
}

fn id_list(payload: &Value, field: &str) -> Vec<u64> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

fn describe_rest_error(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("code"))
        .and_then(Value::as_str);
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str);
    match (code, message) {
        (Some(code), Some(message)) => format!("WordPress API error [{code}] (HTTP {status}): {message}"),
        _ => format!("WordPress API request failed with HTTP {status}"),
    }
}

/// Writes are only retried when the server says it did not process them.
fn is_retryable_status(status: StatusCode, is_write: bool) -> bool {
    if is_write {
        return matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        );
    }
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_dates_use_t_separator() {
        assert_eq!(rest_date("2010-01-01 10:00:00"), "2010-01-01T10:00:00");
        assert_eq!(rest_date("2010-01-01T10:00:00"), "2010-01-01T10:00:00");
    }

    #[test]
    fn raw_field_prefers_raw_over_rendered() {
        let post = json!({
            "title": { "raw": "Caf\u{e9} & more", "rendered": "Caf&eacute; &amp; more" },
            "slug": "cafe"
        });
        assert_eq!(raw_field(&post, "title"), "Caf\u{e9} & more");
        assert_eq!(raw_field(&post, "slug"), "cafe");
        assert_eq!(raw_field(&post, "content"), "");
    }

    #[test]
    fn rest_errors_include_code_and_message() {
        let message = describe_rest_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":"existing_user_login","message":"Sorry, that username already exists!"}"#,
        );
        assert!(message.contains("existing_user_login"));
        assert!(message.contains("already exists"));
        assert_eq!(
            describe_rest_error(StatusCode::BAD_GATEWAY, "<html>"),
            "WordPress API request failed with HTTP 502 Bad Gateway"
        );
    }

    #[test]
    fn writes_retry_only_when_unprocessed() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS, true));
        assert!(!is_retryable_status(StatusCode::GATEWAY_TIMEOUT, true));
        assert!(is_retryable_status(StatusCode::GATEWAY_TIMEOUT, false));
    }

    #[test]
    fn term_ids_are_read_from_arrays() {
        let post = json!({ "categories": [1, 7], "tags": [] });
        assert_eq!(id_list(&post, "categories"), vec![1, 7]);
        assert!(id_list(&post, "tags").is_empty());
        assert!(id_list(&post, "missing").is_empty());
    }
}
