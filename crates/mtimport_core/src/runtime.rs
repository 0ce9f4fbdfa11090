use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::ImporterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// Raw command-line inputs for one import run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub blog: Option<String>,
    pub backup: Option<PathBuf>,
    pub import_dir: Option<PathBuf>,
    pub import_hostname: Option<String>,
}

/// The destination site, fully resolved before any importer runs.
#[derive(Debug, Clone)]
pub struct SiteTarget {
    pub blog_id: u64,
    pub host: String,
    pub url: String,
    pub upload_dir: PathBuf,
    pub upload_url: String,
    pub host_source: ValueSource,
    pub url_source: ValueSource,
    pub upload_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub import_dir: PathBuf,
    pub backup_name: String,
    pub staging_dir: PathBuf,
}

impl SiteTarget {
    pub fn diagnostics(&self) -> String {
        format!(
            "blog_id={}\nhost={} ({})\nurl={} ({})\nupload_dir={} ({})\nupload_url={}",
            self.blog_id,
            self.host,
            self.host_source.as_str(),
            self.url,
            self.url_source.as_str(),
            normalize_for_display(&self.upload_dir),
            self.upload_source.as_str(),
            self.upload_url,
        )
    }
}

/// Validate the required arguments and locate the import directory and first chunk.
pub fn resolve_run_paths(
    request: &RunRequest,
    config: &ImporterConfig,
    cwd: &Path,
) -> Result<RunPaths> {
    let Some(import_dir) = request.import_dir.as_deref() else {
        bail!("argument --import-dir is required: directory holding the backup chunks");
    };
    let Some(backup) = request.backup.as_deref() else {
        bail!("argument --backup is required: first chunk of the backup to import");
    };
    let import_dir = absolutize(import_dir, cwd);
    if !import_dir.is_dir() {
        bail!("import directory not found: {}", import_dir.display());
    }
    let backup_name = backup
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("backup path has no file name: {}", backup.display()))?;
    let first_chunk = import_dir.join(&backup_name);
    if !first_chunk.is_file() {
        bail!("backup chunk not found: {}", first_chunk.display());
    }
    let staging_dir = match config.import.staging_dir.as_deref() {
        Some(path) if !path.trim().is_empty() => absolutize(Path::new(path.trim()), &import_dir),
        _ => import_dir.join("imports"),
    };
    Ok(RunPaths {
        import_dir,
        backup_name,
        staging_dir,
    })
}

pub fn resolve_site_target(config: &ImporterConfig, request: &RunRequest) -> Result<SiteTarget> {
    resolve_site_target_with_lookup(config, request, |key| env::var(key).ok())
}

fn resolve_site_target_with_lookup<F>(
    config: &ImporterConfig,
    request: &RunRequest,
    lookup_env: F,
) -> Result<SiteTarget>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(blog) = request.blog.as_deref() else {
        bail!("argument --blog is required: blog id of the site to import into");
    };
    let blog_id = blog
        .trim()
        .parse::<u64>()
        .with_context(|| format!("please provide the numeric blog id (got `{blog}`)"))?;

    let (host, host_source) = resolve_host(config, request, &lookup_env)?;
    let host_section = config.hosts.get(&host);
    let site_section = host_section.and_then(|section| section.sites.get(&blog_id.to_string()));

    let (url, url_source) = pick_value(
        lookup_env("WP_URL"),
        site_section.and_then(|site| site.url.clone()),
        host_section.and_then(|section| section.url.clone()),
    )
    .ok_or_else(|| {
        anyhow::anyhow!("could not resolve a site url for blog {blog_id} on host `{host}`")
    })?;
    let url = url.trim_end_matches('/').to_string();

    let (upload_dir, upload_source) = pick_value(
        lookup_env("WP_UPLOAD_DIR"),
        site_section.and_then(|site| site.upload_dir.clone()),
        host_section.and_then(|section| section.upload_dir.clone()),
    )
    .ok_or_else(|| anyhow::anyhow!("could not resolve an upload_dir for blog {blog_id}"))?;

    let upload_url = pick_value(
        lookup_env("WP_UPLOAD_URL"),
        site_section.and_then(|site| site.upload_url.clone()),
        host_section.and_then(|section| section.upload_url.clone()),
    )
    .map(|(value, _)| value)
    .unwrap_or_else(|| format!("{url}/wp-content/uploads/"));

    Ok(SiteTarget {
        blog_id,
        host,
        url,
        upload_dir: PathBuf::from(upload_dir),
        upload_url: trailing_slash(&upload_url),
        host_source,
        url_source,
        upload_source,
    })
}

fn resolve_host<F>(
    config: &ImporterConfig,
    request: &RunRequest,
    lookup_env: &F,
) -> Result<(String, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = non_empty(request.import_hostname.clone()) {
        return Ok((host, ValueSource::Flag));
    }
    if let Some(host) = non_empty(lookup_env("WP_IMPORT_HOSTNAME")) {
        return Ok((host, ValueSource::Env));
    }
    if let Some(host) = non_empty(config.wordpress.default_host.clone()) {
        return Ok((host, ValueSource::Config));
    }
    let mut hosts = config.hosts.keys();
    match (hosts.next(), hosts.next()) {
        (Some(only), None) => Ok((only.clone(), ValueSource::Default)),
        (None, _) => Ok(("default".to_string(), ValueSource::Default)),
        (Some(_), Some(_)) => bail!(
            "several hosts are configured; pass --import-hostname or set wordpress.default_host"
        ),
    }
}

fn pick_value(
    env_value: Option<String>,
    site_value: Option<String>,
    host_value: Option<String>,
) -> Option<(String, ValueSource)> {
    if let Some(value) = non_empty(env_value) {
        return Some((value, ValueSource::Env));
    }
    non_empty(site_value)
        .or_else(|| non_empty(host_value))
        .map(|value| (value, ValueSource::Config))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn trailing_slash(value: &str) -> String {
    format!("{}/", value.trim_end_matches('/'))
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{HostSection, SiteSection};

    fn config_with_host() -> ImporterConfig {
        let mut sites = BTreeMap::new();
        sites.insert(
            "4".to_string(),
            SiteSection {
                url: Some("https://new.example/news/".to_string()),
                upload_dir: Some("/srv/news/uploads".to_string()),
                upload_url: None,
            },
        );
        let mut hosts = BTreeMap::new();
        hosts.insert(
            "wp_trunk".to_string(),
            HostSection {
                url: Some("https://new.example".to_string()),
                upload_dir: Some("/srv/uploads".to_string()),
                upload_url: Some("https://new.example/uploads".to_string()),
                sites,
            },
        );
        ImporterConfig {
            hosts,
            ..ImporterConfig::default()
        }
    }

    fn request(blog: &str) -> RunRequest {
        RunRequest {
            blog: Some(blog.to_string()),
            ..RunRequest::default()
        }
    }

    #[test]
    fn single_host_is_selected_by_default() {
        let target =
            resolve_site_target_with_lookup(&config_with_host(), &request("1"), |_| None)
                .expect("target");
        assert_eq!(target.host, "wp_trunk");
        assert_eq!(target.host_source, ValueSource::Default);
        assert_eq!(target.url, "https://new.example");
        assert_eq!(target.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(target.upload_url, "https://new.example/uploads/");
    }

    #[test]
    fn site_entry_overrides_host_values() {
        let target =
            resolve_site_target_with_lookup(&config_with_host(), &request("4"), |_| None)
                .expect("target");
        assert_eq!(target.url, "https://new.example/news");
        assert_eq!(target.upload_dir, PathBuf::from("/srv/news/uploads"));
        assert_eq!(target.upload_url, "https://new.example/uploads/");
    }

    #[test]
    fn env_overrides_config() {
        let target = resolve_site_target_with_lookup(&config_with_host(), &request("1"), |key| {
            (key == "WP_URL").then(|| "https://staging.example/".to_string())
        })
        .expect("target");
        assert_eq!(target.url, "https://staging.example");
        assert_eq!(target.url_source, ValueSource::Env);
    }

    #[test]
    fn non_numeric_blog_is_fatal() {
        let error = resolve_site_target_with_lookup(&config_with_host(), &request("news"), |_| None)
            .expect_err("must fail");
        assert!(error.to_string().contains("numeric blog id"));
    }

    #[test]
    fn unknown_host_cannot_be_resolved() {
        let mut req = request("1");
        req.import_hostname = Some("elsewhere".to_string());
        let error = resolve_site_target_with_lookup(&config_with_host(), &req, |_| None)
            .expect_err("must fail");
        assert!(error.to_string().contains("could not resolve a site url"));
    }

    #[test]
    fn missing_blog_is_fatal() {
        let error =
            resolve_site_target_with_lookup(&config_with_host(), &RunRequest::default(), |_| None)
                .expect_err("must fail");
        assert!(error.to_string().contains("--blog is required"));
    }

    #[test]
    fn run_paths_require_existing_first_chunk() {
        let temp = tempdir().expect("tempdir");
        let config = ImporterConfig::default();
        let mut req = RunRequest {
            import_dir: Some(temp.path().to_path_buf()),
            backup: Some(PathBuf::from("/elsewhere/backup-1.xml")),
            ..RunRequest::default()
        };
        assert!(resolve_run_paths(&req, &config, temp.path()).is_err());

        fs::write(temp.path().join("backup-1.xml"), "<backup/>").expect("write chunk");
        let paths = resolve_run_paths(&req, &config, temp.path()).expect("paths");
        assert_eq!(paths.backup_name, "backup-1.xml");
        assert_eq!(paths.staging_dir, temp.path().join("imports"));

        req.backup = None;
        assert!(resolve_run_paths(&req, &config, temp.path()).is_err());
    }
}
