//! Per-resource lookups: video stats, availability checks and search results.
//!
//! Every lookup here degrades instead of failing. A resource whose call errors
//! keeps its "N/A" sentinels and its siblings are unaffected.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use url::Url;

use crate::backend::{Backend, CheckedResource};
use crate::plan::model::NOT_AVAILABLE;

pub const PLACEHOLDER_THUMBNAIL: &str = "https://via.placeholder.com/120";
pub const NO_RESOURCES_FOUND: &str = "No resources found";
const CHECK_FAILED: &str = "Error occurred during the check";

/// Pulls the video id out of a watch or short link.
pub fn extract_video_id(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let id = if host == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if host.ends_with("youtube.com") {
        url.query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())
            .or_else(|| {
                let mut segs = url.path_segments()?;
                match segs.next()? {
                    "embed" | "shorts" | "live" => segs.next().map(str::to_string),
                    _ => None,
                }
            })
    } else {
        None
    };
    id.filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStatus {
    pub views: String,
    pub likes: String,
    pub thumbnail: Option<String>,
    /// True when the numbers are not live statistics.
    pub fallback: bool,
}

impl VideoStatus {
    pub fn unknown() -> Self {
        Self {
            views: NOT_AVAILABLE.to_string(),
            likes: NOT_AVAILABLE.to_string(),
            thumbnail: None,
            fallback: true,
        }
    }
}

/// Stats for one video id; "N/A" for anything that could not be fetched.
pub async fn fetch_video_status(backend: &dyn Backend, video_id: Option<&str>) -> VideoStatus {
    let Some(id) = video_id else {
        return VideoStatus::unknown();
    };
    match backend.video_stats(id).await {
        Ok(stats) => {
            let text = |v: Option<String>| {
                v.filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            };
            VideoStatus {
                views: text(stats.views),
                likes: text(stats.likes),
                thumbnail: stats.thumbnail.filter(|t| !t.is_empty()),
                fallback: stats.fallback,
            }
        }
        Err(e) => {
            tracing::warn!(video_id = %id, error = %e, "video stats unavailable");
            VideoStatus::unknown()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub exists: bool,
    pub metadata: Option<CheckedResource>,
    pub message: Option<String>,
}

pub async fn check_availability(
    backend: &dyn Backend,
    url: &str,
    participant: &str,
    research_query: &str,
) -> Availability {
    match backend.check_resource(url, participant, research_query).await {
        Ok(checked) if checked.exists => Availability {
            exists: true,
            message: None,
            metadata: Some(checked),
        },
        Ok(checked) => Availability {
            exists: false,
            message: checked.message.clone(),
            metadata: None,
        },
        Err(e) => {
            tracing::warn!(url, error = %e, "availability check failed");
            Availability {
                exists: false,
                metadata: None,
                message: Some(CHECK_FAILED.to_string()),
            }
        }
    }
}

/// One resource link to look up after a plan loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceJob {
    pub link: String,
    pub research_query: String,
    pub has_thumbnail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUpdate {
    Status { link: String, status: VideoStatus },
    Availability { link: String, availability: Availability },
}

impl ResourceUpdate {
    pub fn link(&self) -> &str {
        match self {
            ResourceUpdate::Status { link, .. } | ResourceUpdate::Availability { link, .. } => link,
        }
    }
}

/// Keeps the first job for each link.
pub fn dedupe_jobs(jobs: Vec<ResourceJob>) -> Vec<ResourceJob> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|j| !j.link.is_empty() && seen.insert(j.link.clone()))
        .collect()
}

async fn run_job(backend: Arc<dyn Backend>, participant: Arc<str>, job: ResourceJob) -> Vec<ResourceUpdate> {
    let video_id = extract_video_id(&job.link);
    let status = async {
        let mut status = fetch_video_status(backend.as_ref(), video_id.as_deref()).await;
        if status.thumbnail.is_none() && !job.has_thumbnail {
            if let Some(id) = video_id.as_deref() {
                match backend.thumbnail(id).await {
                    Ok(t) => status.thumbnail = Some(t),
                    Err(e) => tracing::debug!(video_id = %id, error = %e, "no thumbnail"),
                }
            }
        }
        status
    };
    let availability =
        check_availability(backend.as_ref(), &job.link, &participant, &job.research_query);
    let (status, availability) = tokio::join!(status, availability);

    vec![
        ResourceUpdate::Status {
            link: job.link.clone(),
            status,
        },
        ResourceUpdate::Availability {
            link: job.link,
            availability,
        },
    ]
}

/// Looks up every job with at most `limit` resources in flight, handing each
/// update to `sink` as soon as it is ready.
pub async fn load_plan_resources<F>(
    backend: Arc<dyn Backend>,
    participant: &str,
    jobs: Vec<ResourceJob>,
    limit: usize,
    mut sink: F,
) where
    F: FnMut(ResourceUpdate),
{
    let jobs = dedupe_jobs(jobs);
    tracing::debug!(count = jobs.len(), limit, "loading plan resources");
    let participant: Arc<str> = Arc::from(participant);

    let mut updates = stream::iter(jobs)
        .map(|job| run_job(backend.clone(), participant.clone(), job))
        .buffer_unordered(limit.max(1));

    while let Some(batch) = updates.next().await {
        for update in batch {
            sink(update);
        }
    }
}

/// A candidate shown in the resource picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub thumbnail: String,
    pub views: String,
    pub likes: String,
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Searches for videos and attaches stats to each hit. Items without a video
/// id (channels, playlists) are skipped.
pub async fn search_videos(
    backend: Arc<dyn Backend>,
    query: &str,
    participant: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>, crate::error::BackendError> {
    let items = backend.search(query, participant).await?;

    let results = stream::iter(items.into_iter().filter_map(|item| {
        let id = item.id.video_id.filter(|v| !v.is_empty())?;
        Some((id, item.snippet))
    }))
    .map(|(id, snippet)| {
        let backend = backend.clone();
        async move {
            let status = fetch_video_status(backend.as_ref(), Some(id.as_str())).await;
            SearchResult {
                link: watch_url(&id),
                thumbnail: snippet
                    .thumbnails
                    .best()
                    .map(str::to_string)
                    .or(status.thumbnail)
                    .unwrap_or_else(|| PLACEHOLDER_THUMBNAIL.to_string()),
                title: snippet.title,
                description: snippet.description,
                views: status.views,
                likes: status.likes,
                video_id: id,
            }
        }
    })
    .buffered(limit.max(1))
    .collect::<Vec<_>>()
    .await;

    Ok(results)
}

/// "1234567" -> "1.2M", "5400" -> "5.4k". Anything that is not a number is
/// returned as is.
pub fn format_count(raw: &str) -> String {
    let Ok(n) = raw.trim().parse::<f64>() else {
        return raw.to_string();
    };
    if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}k", n / 1_000.0)
    } else {
        format!("{}", n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SearchItem, SearchItemId, Snippet, VideoStats};
    use crate::error::BackendError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        stats: HashMap<String, Result<VideoStats, ()>>,
        items: Vec<SearchItem>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        checked: Mutex<Vec<(String, String)>>,
    }

    fn stats(views: &str) -> VideoStats {
        VideoStats {
            views: Some(views.into()),
            likes: Some("7".into()),
            fallback: false,
            thumbnail: None,
        }
    }

    fn fail(endpoint: &'static str) -> BackendError {
        BackendError::Status {
            endpoint,
            status: 500,
            body: String::new(),
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn respond(&self, _: &str, _: &str) -> Result<String, BackendError> {
            Err(fail("/response"))
        }
        async fn critique(&self, _: &str) -> Result<String, BackendError> {
            Err(fail("/response/critique"))
        }
        async fn improve(&self, _: &str) -> Result<String, BackendError> {
            Err(fail("/response/improved"))
        }
        async fn info(&self, _: &str) -> Result<String, BackendError> {
            Err(fail("/info"))
        }
        async fn search(&self, _: &str, _: Option<&str>) -> Result<Vec<SearchItem>, BackendError> {
            Ok(self.items.clone())
        }
        async fn check_resource(
            &self,
            url: &str,
            _: &str,
            query: &str,
        ) -> Result<CheckedResource, BackendError> {
            self.checked
                .lock()
                .unwrap()
                .push((url.to_string(), query.to_string()));
            Ok(CheckedResource {
                exists: true,
                title: Some("t".into()),
                ..CheckedResource::default()
            })
        }
        async fn thumbnail(&self, id: &str) -> Result<String, BackendError> {
            Ok(format!("thumb-{id}"))
        }
        async fn video_stats(&self, id: &str) -> Result<VideoStats, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.stats.get(id) {
                Some(Ok(s)) => Ok(s.clone()),
                _ => Err(fail("/video_stats")),
            }
        }
        async fn topic_explanation(&self, _: &str, _: &str) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
        async fn objectives(&self, _: &str, _: &str) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
        async fn plan_reasoning(&self, _: &str, _: &str) -> Result<Value, BackendError> {
            Ok(Value::Null)
        }
    }

    fn job(id: &str) -> ResourceJob {
        ResourceJob {
            link: format!("https://www.youtube.com/watch?v={id}"),
            research_query: format!("q-{id}"),
            has_thumbnail: false,
        }
    }

    #[test]
    fn extracts_video_ids() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10"),
            Some("dQw4w9WgXcQ".into())
        );
        assert_eq!(extract_video_id("https://youtu.be/abc123"), Some("abc123".into()));
        assert_eq!(
            extract_video_id("https://youtube.com/embed/xyz"),
            Some("xyz".into())
        );
        assert_eq!(extract_video_id("https://example.com/watch?v=nope"), None);
        assert_eq!(extract_video_id("not a url"), None);
    }

    #[test]
    fn formats_counts() {
        assert_eq!(format_count("1234567"), "1.2M");
        assert_eq!(format_count("5400"), "5.4k");
        assert_eq!(format_count("999"), "999");
        assert_eq!(format_count("N/A"), "N/A");
    }

    #[tokio::test]
    async fn failed_stats_do_not_affect_siblings() {
        let mut backend = FakeBackend::default();
        backend.stats.insert("good".into(), Ok(stats("100")));
        backend.stats.insert("bad".into(), Err(()));
        let backend: Arc<dyn Backend> = Arc::new(backend);

        let mut got = Vec::new();
        load_plan_resources(
            backend,
            "p",
            vec![job("good"), job("bad")],
            4,
            |u| got.push(u),
        )
        .await;

        let status_of = |id: &str| {
            got.iter()
                .find_map(|u| match u {
                    ResourceUpdate::Status { link, status } if link.ends_with(id) => {
                        Some(status.clone())
                    }
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(status_of("good").views, "100");
        assert_eq!(status_of("good").thumbnail.as_deref(), Some("thumb-good"));
        assert_eq!(status_of("bad").views, NOT_AVAILABLE);
        assert_eq!(status_of("bad").likes, NOT_AVAILABLE);
        assert_eq!(got.len(), 4);
    }

    #[tokio::test]
    async fn fan_out_is_bounded_and_deduplicated() {
        let mut backend = FakeBackend::default();
        for i in 0..8 {
            backend.stats.insert(format!("v{i}"), Ok(stats("1")));
        }
        let backend = Arc::new(backend);
        let mut jobs: Vec<ResourceJob> = (0..8).map(|i| job(&format!("v{i}"))).collect();
        jobs.push(job("v0"));

        let mut count = 0;
        load_plan_resources(backend.clone(), "p", jobs, 2, |_| count += 1).await;

        assert_eq!(count, 16);
        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        let checked = backend.checked.lock().unwrap();
        assert_eq!(checked.len(), 8);
        assert!(checked.iter().any(|(_, q)| q == "q-v3"));
    }

    #[tokio::test]
    async fn search_shapes_results() {
        let mut backend = FakeBackend::default();
        backend.stats.insert("v1".into(), Ok(stats("2500")));
        backend.items = vec![
            SearchItem {
                id: SearchItemId {
                    video_id: Some("v1".into()),
                },
                snippet: Snippet {
                    title: "One".into(),
                    ..Snippet::default()
                },
            },
            SearchItem::default(),
        ];
        let results = search_videos(Arc::new(backend), "rust", Some("p"), 4)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].link, "https://www.youtube.com/watch?v=v1");
        assert_eq!(results[0].thumbnail, PLACEHOLDER_THUMBNAIL);
        assert_eq!(results[0].views, "2500");
    }
}
