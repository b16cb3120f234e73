//! Code-hosting extras for link cards: star counts on repository roots and
//! line counts on commits, pull requests and merge requests.

use std::sync::Arc;
use std::time::Duration;

use folio_common::cache::{self, Cache};
use folio_common::{ConfigError, RenderConfig};
use url::Url;

use super::fetch::{FetchError, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Forge {
    GitHub,
    GitLab,
}

impl Forge {
    pub fn from_url(url: &Url) -> Option<Self> {
        match url.host_str()? {
            "github.com" | "www.github.com" => Some(Forge::GitHub),
            "gitlab.com" | "www.gitlab.com" => Some(Forge::GitLab),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Forge::GitHub => "github",
            Forge::GitLab => "gitlab",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// The project root and nothing after it.
    Repo,
    Commit(String),
    /// A pull request (GitHub) or merge request (GitLab).
    Change(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeTarget {
    pub forge: Forge,
    /// `owner/repo` on GitHub, the full namespace path on GitLab.
    pub project: String,
    pub kind: TargetKind,
}

impl ForgeTarget {
    fn api_path(&self) -> String {
        let project = &self.project;
        match (self.forge, &self.kind) {
            (Forge::GitHub, TargetKind::Repo) => format!("repos/{project}"),
            (Forge::GitHub, TargetKind::Commit(sha)) => format!("repos/{project}/commits/{sha}"),
            (Forge::GitHub, TargetKind::Change(n)) => format!("repos/{project}/pulls/{n}"),
            (Forge::GitLab, kind) => {
                let id: String = url::form_urlencoded::byte_serialize(project.as_bytes()).collect();
                match kind {
                    TargetKind::Repo => format!("projects/{id}"),
                    TargetKind::Commit(sha) => format!("projects/{id}/repository/commits/{sha}"),
                    // Merge requests carry no totals; they are summed from the diffs.
                    TargetKind::Change(n) => format!("projects/{id}/merge_requests/{n}/diffs"),
                }
            }
        }
    }

    fn cache_key(&self) -> String {
        format!("{}:{}", self.forge.as_str(), self.api_path().to_ascii_lowercase())
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 100
        && s != "."
        && s != ".."
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn is_sha(s: &str) -> bool {
    (7..=64).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Work out what kind of forge page `url` is, if it's one we have stats for.
pub fn classify(url: &Url) -> Option<ForgeTarget> {
    let forge = Forge::from_url(url)?;
    let segs: Vec<&str> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();
    match forge {
        Forge::GitHub => classify_github(&segs),
        Forge::GitLab => classify_gitlab(&segs),
    }
}

fn classify_github(segs: &[&str]) -> Option<ForgeTarget> {
    let [owner, repo, rest @ ..] = segs else {
        return None;
    };
    if !is_name(owner) || !is_name(repo) {
        return None;
    }
    let kind = match rest {
        [] => TargetKind::Repo,
        ["commit", sha] if is_sha(sha) => TargetKind::Commit(sha.to_string()),
        ["pull", number, ..] => TargetKind::Change(number.parse().ok()?),
        _ => return None,
    };
    Some(ForgeTarget {
        forge: Forge::GitHub,
        project: format!("{owner}/{}", repo.trim_end_matches(".git")),
        kind,
    })
}

/// GitLab projects nest under groups, and project pages live after a `-`
/// segment: `group/sub/project/-/merge_requests/12`.
fn classify_gitlab(segs: &[&str]) -> Option<ForgeTarget> {
    let split = segs.iter().position(|s| *s == "-").unwrap_or(segs.len());
    let (path, rest) = segs.split_at(split);
    if path.len() < 2 || !path.iter().all(|s| is_name(s)) {
        return None;
    }
    let kind = match rest {
        [] => TargetKind::Repo,
        ["-", "commit", sha] if is_sha(sha) => TargetKind::Commit(sha.to_string()),
        ["-", "merge_requests", number, ..] => TargetKind::Change(number.parse().ok()?),
        _ => return None,
    };
    let mut project = path.join("/");
    if let Some(stripped) = project.strip_suffix(".git") {
        project = stripped.to_owned();
    }
    Some(ForgeTarget {
        forge: Forge::GitLab,
        project,
        kind,
    })
}

/// Strip the forge's decorations from a page title.
///
/// `GitHub - owner/repo: description` becomes `owner/repo`. A trailing
/// ` · GitHub` or ` · GitLab` is dropped.
pub fn normalize_title(title: &str) -> String {
    let mut title = title.trim();
    if let Some(rest) = title.strip_prefix("GitHub - ") {
        title = rest.split_once(": ").map_or(rest, |(name, _)| name);
    }
    title
        .strip_suffix(" · GitHub")
        .or_else(|| title.strip_suffix(" · GitLab"))
        .unwrap_or(title)
        .trim()
        .to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffStats {
    pub additions: u64,
    pub deletions: u64,
}

impl DiffStats {
    /// Count added and removed lines in a unified diff body.
    fn from_unified(diff: &str) -> Self {
        let mut stats = DiffStats {
            additions: 0,
            deletions: 0,
        };
        for line in diff.lines() {
            if line.starts_with('+') && !line.starts_with("+++ ") {
                stats.additions += 1;
            } else if line.starts_with('-') && !line.starts_with("--- ") {
                stats.deletions += 1;
            }
        }
        stats
    }

    fn merge(self, other: Self) -> Self {
        DiffStats {
            additions: self.additions + other.additions,
            deletions: self.deletions + other.deletions,
        }
    }
}

struct Api {
    base: Url,
    token: Option<String>,
}

impl Api {
    fn new(key: &'static str, base: &str, token: Option<String>) -> Result<Self, ConfigError> {
        let mut base = Url::parse(base).map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base, token })
    }
}

/// Star counts and diff sizes from the forge REST APIs, cached per target.
pub struct ForgeStats {
    fetcher: Arc<dyn Fetcher>,
    github: Api,
    gitlab: Api,
    timeout: Duration,
    stars: Cache<String, u64>,
    diffs: Cache<String, DiffStats>,
}

impl ForgeStats {
    pub fn new(config: &RenderConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, ConfigError> {
        Ok(Self {
            fetcher,
            github: Api::new(
                "github_api_base",
                &config.github_api_base,
                config.github_token.clone(),
            )?,
            gitlab: Api::new(
                "gitlab_api_base",
                &config.gitlab_api_base,
                config.gitlab_token.clone(),
            )?,
            timeout: config.fetch_timeout(),
            stars: cache::new_cache(config.stats_cache_capacity, config.stats_cache_ttl()),
            diffs: cache::new_cache(config.stats_cache_capacity, config.stats_cache_ttl()),
        })
    }

    async fn call(&self, target: &ForgeTarget) -> Result<serde_json::Value, FetchError> {
        let api = match target.forge {
            Forge::GitHub => &self.github,
            Forge::GitLab => &self.gitlab,
        };
        let url = api
            .base
            .join(&target.api_path())
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch_json(&url, api.token.as_deref()),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
    }

    pub async fn stars(&self, target: &ForgeTarget) -> Option<u64> {
        if target.kind != TargetKind::Repo {
            return None;
        }
        let key = target.cache_key();
        if let Some(stars) = cache::get(&self.stars, &key) {
            return Some(stars);
        }
        match self.call(target).await {
            Ok(json) => {
                let field = match target.forge {
                    Forge::GitHub => "stargazers_count",
                    Forge::GitLab => "star_count",
                };
                let stars = json.get(field)?.as_u64()?;
                cache::insert(&self.stars, key, stars);
                Some(stars)
            }
            Err(err) => {
                tracing::debug!(%err, project = %target.project, "star count unavailable");
                None
            }
        }
    }

    pub async fn diff_stats(&self, target: &ForgeTarget) -> Option<DiffStats> {
        if target.kind == TargetKind::Repo {
            return None;
        }
        let key = target.cache_key();
        if let Some(stats) = cache::get(&self.diffs, &key) {
            return Some(stats);
        }
        let json = match self.call(target).await {
            Ok(json) => json,
            Err(err) => {
                tracing::debug!(%err, path = %target.api_path(), "diff stats unavailable");
                return None;
            }
        };
        let stats = match (target.forge, &target.kind) {
            (Forge::GitLab, TargetKind::Change(_)) => json
                .as_array()?
                .iter()
                .filter_map(|file| file.get("diff")?.as_str())
                .map(DiffStats::from_unified)
                .fold(
                    DiffStats {
                        additions: 0,
                        deletions: 0,
                    },
                    DiffStats::merge,
                ),
            _ => {
                // Commits nest the counts under `stats`, GitHub pull requests don't.
                let counts = json.get("stats").unwrap_or(&json);
                DiffStats {
                    additions: counts.get("additions")?.as_u64()?,
                    deletions: counts.get("deletions")?.as_u64()?,
                }
            }
        };
        cache::insert(&self.diffs, key, stats);
        Some(stats)
    }
}

/// `1234` → `1.2k`, `2_500_000` → `2.5m`.
pub fn format_count(n: u64) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => trim_fraction(format!("{:.1}", n as f64 / 1_000.0)) + "k",
        _ => trim_fraction(format!("{:.1}", n as f64 / 1_000_000.0)) + "m",
    }
}

fn trim_fraction(s: String) -> String {
    s.strip_suffix(".0").map(str::to_owned).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::enrich::fetch::FetchedPage;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn target(forge: Forge, project: &str, kind: TargetKind) -> ForgeTarget {
        ForgeTarget {
            forge,
            project: project.into(),
            kind,
        }
    }

    #[test]
    fn classifies_github_pages() {
        assert_eq!(
            classify(&url("https://github.com/rust-lang/rust")),
            Some(target(Forge::GitHub, "rust-lang/rust", TargetKind::Repo))
        );
        assert_eq!(
            classify(&url("https://github.com/rust-lang/rust/pull/1234/files")),
            Some(target(Forge::GitHub, "rust-lang/rust", TargetKind::Change(1234)))
        );
        assert!(matches!(
            classify(&url("https://github.com/a/b/commit/0123abc")),
            Some(ForgeTarget {
                kind: TargetKind::Commit(_),
                ..
            })
        ));
        assert_eq!(classify(&url("https://github.com/rust-lang/rust/issues/1")), None);
        assert_eq!(classify(&url("https://github.com/rust-lang")), None);
        assert_eq!(classify(&url("https://bitbucket.org/a/b")), None);
    }

    #[test]
    fn classifies_gitlab_pages() {
        assert_eq!(
            classify(&url("https://gitlab.com/gitlab-org/gitlab")),
            Some(target(Forge::GitLab, "gitlab-org/gitlab", TargetKind::Repo))
        );
        assert_eq!(
            classify(&url("https://gitlab.com/group/sub/proj/-/merge_requests/12/diffs")),
            Some(target(Forge::GitLab, "group/sub/proj", TargetKind::Change(12)))
        );
        assert_eq!(
            classify(&url("https://gitlab.com/g/p/-/commit/abcdef0")),
            Some(target(
                Forge::GitLab,
                "g/p",
                TargetKind::Commit("abcdef0".into())
            ))
        );
        assert_eq!(classify(&url("https://gitlab.com/g/p/-/issues/3")), None);
        assert_eq!(classify(&url("https://gitlab.com/explore")), None);
    }

    #[test]
    fn gitlab_project_ids_are_encoded() {
        let t = target(Forge::GitLab, "group/sub/proj", TargetKind::Change(12));
        assert_eq!(t.api_path(), "projects/group%2Fsub%2Fproj/merge_requests/12/diffs");
        let gh = target(Forge::GitHub, "group/proj", TargetKind::Repo);
        assert_ne!(gh.cache_key(), target(Forge::GitLab, "group/proj", TargetKind::Repo).cache_key());
    }

    #[test]
    fn titles_lose_forge_decoration() {
        assert_eq!(
            normalize_title("GitHub - tokio-rs/tokio: A runtime for writing reliable apps"),
            "tokio-rs/tokio"
        );
        assert_eq!(
            normalize_title("Fix the thing by someone · Pull Request #1 · a/b · GitHub"),
            "Fix the thing by someone · Pull Request #1 · a/b"
        );
        assert_eq!(
            normalize_title("Speed up CI (!12) · Merge requests · g / p · GitLab"),
            "Speed up CI (!12) · Merge requests · g / p"
        );
        assert_eq!(normalize_title("Plain"), "Plain");
    }

    #[test]
    fn unified_diffs_are_counted_without_headers() {
        let diff = "--- a/x\n+++ b/x\n@@ -1,3 +1,3 @@\n-old\n+new\n+more\n same\n";
        assert_eq!(
            DiffStats::from_unified(diff),
            DiffStats {
                additions: 2,
                deletions: 1
            }
        );
    }

    #[test]
    fn counts_are_compact() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1k");
        assert_eq!(format_count(1_234), "1.2k");
        assert_eq!(format_count(2_500_000), "2.5m");
    }

    struct MockApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for MockApi {
        async fn fetch_page(&self, _: &Url, _: usize) -> Result<FetchedPage, FetchError> {
            Err(FetchError::Status(404))
        }

        async fn fetch_json(
            &self,
            url: &Url,
            bearer: Option<&str>,
        ) -> Result<serde_json::Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match (url.host_str(), url.path()) {
                (Some("api.github.com"), path) => {
                    assert_eq!(bearer, Some("tok"));
                    match path {
                        "/repos/a/b" => Ok(serde_json::json!({ "stargazers_count": 4321 })),
                        "/repos/a/b/commits/abcdef0" => Ok(serde_json::json!({
                            "stats": { "additions": 3, "deletions": 1 }
                        })),
                        "/repos/a/b/pulls/7" => {
                            Ok(serde_json::json!({ "additions": 10, "deletions": 2 }))
                        }
                        _ => Err(FetchError::Status(404)),
                    }
                }
                (Some("gitlab.com"), path) => {
                    assert_eq!(bearer, Some("gl"));
                    match path {
                        "/api/v4/projects/g%2Fp" => Ok(serde_json::json!({ "star_count": 58 })),
                        "/api/v4/projects/g%2Fp/merge_requests/12/diffs" => Ok(serde_json::json!([
                            { "old_path": "a.rs", "diff": "@@ -1 +1,2 @@\n-a\n+b\n+c\n" },
                            { "old_path": "b.rs", "diff": "@@ -1,2 +0,0 @@\n-x\n-y\n" },
                            { "old_path": "bin", "too_large": true }
                        ])),
                        _ => Err(FetchError::Status(404)),
                    }
                }
                _ => Err(FetchError::Status(404)),
            }
        }
    }

    fn stats() -> (ForgeStats, Arc<MockApi>) {
        let api = Arc::new(MockApi {
            calls: AtomicUsize::new(0),
        });
        let config = RenderConfig {
            github_token: Some("tok".into()),
            gitlab_token: Some("gl".into()),
            ..Default::default()
        };
        (ForgeStats::new(&config, api.clone()).unwrap(), api)
    }

    #[tokio::test]
    async fn stars_are_fetched_once_then_cached() {
        let (stats, api) = stats();
        let repo = target(Forge::GitHub, "a/b", TargetKind::Repo);
        let shouted = target(Forge::GitHub, "A/B", TargetKind::Repo);
        assert_eq!(stats.stars(&repo).await, Some(4321));
        assert_eq!(stats.stars(&shouted).await, Some(4321));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        let missing = target(Forge::GitHub, "a/missing", TargetKind::Repo);
        assert_eq!(stats.stars(&missing).await, None);
        let gitlab = target(Forge::GitLab, "g/p", TargetKind::Repo);
        assert_eq!(stats.stars(&gitlab).await, Some(58));
    }

    #[tokio::test]
    async fn diff_stats_for_commits_pulls_and_merge_requests() {
        let (stats, _) = stats();
        let commit = classify(&url("https://github.com/a/b/commit/abcdef0")).unwrap();
        let pull = classify(&url("https://github.com/a/b/pull/7")).unwrap();
        let merge = classify(&url("https://gitlab.com/g/p/-/merge_requests/12")).unwrap();
        assert_eq!(
            stats.diff_stats(&commit).await,
            Some(DiffStats {
                additions: 3,
                deletions: 1
            })
        );
        assert_eq!(
            stats.diff_stats(&pull).await,
            Some(DiffStats {
                additions: 10,
                deletions: 2
            })
        );
        assert_eq!(
            stats.diff_stats(&merge).await,
            Some(DiffStats {
                additions: 2,
                deletions: 3
            })
        );
    }
}
