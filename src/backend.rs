use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Everything the client needs from the study-plan service.
///
/// Calls are plain request/response; the caller decides what a failure means
/// for the UI.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `/response`. Used both for the first generation stage and for
    /// follow-up chat.
    async fn respond(&self, participant: &str, message: &str) -> Result<String, BackendError>;
    async fn critique(&self, participant: &str) -> Result<String, BackendError>;
    async fn improve(&self, participant: &str) -> Result<String, BackendError>;
    /// `/info`; the reply is an HTML fragment.
    async fn info(&self, message: &str) -> Result<String, BackendError>;
    async fn search(
        &self,
        query: &str,
        participant: Option<&str>,
    ) -> Result<Vec<SearchItem>, BackendError>;
    async fn check_resource(
        &self,
        url: &str,
        participant: &str,
        research_query: &str,
    ) -> Result<CheckedResource, BackendError>;
    async fn thumbnail(&self, video_id: &str) -> Result<String, BackendError>;
    async fn video_stats(&self, video_id: &str) -> Result<VideoStats, BackendError>;
    /// `Ok(None)` when the service answered but had nothing to say.
    async fn topic_explanation(
        &self,
        participant: &str,
        topic: &str,
    ) -> Result<Option<String>, BackendError>;
    async fn objectives(
        &self,
        participant: &str,
        topic: &str,
    ) -> Result<Option<String>, BackendError>;
    /// `/plan-reasoning`; the payload is handed back untouched because the
    /// service sometimes answers with JSON and sometimes with JSON-ish text.
    async fn plan_reasoning(&self, participant: &str, overview: &str)
        -> Result<Value, BackendError>;
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_message: Option<&'a str>,
    #[serde(rename = "participantId")]
    participant_id: &'a str,
}

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    info_message: &'a str,
    #[serde(rename = "participantId", skip_serializing_if = "Option::is_none")]
    participant_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    search_message: &'a str,
    #[serde(rename = "participantId", skip_serializing_if = "Option::is_none")]
    participant_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    check_message: &'a str,
    // The service really does spell it this way.
    #[serde(rename = "participantsId")]
    participants_id: &'a str,
    research_query: &'a str,
}

#[derive(Debug, Serialize)]
struct VideoRequest<'a> {
    video_id: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchItem {
    pub id: SearchItemId,
    pub snippet: Snippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchItemId {
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Snippet {
    pub title: String,
    pub description: String,
    pub thumbnails: Thumbnails,
    #[serde(rename = "channelTitle")]
    pub channel_title: Option<String>,
    #[serde(rename = "publishTime")]
    pub publish_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thumbnails {
    pub default: Option<ThumbnailRef>,
    pub medium: Option<ThumbnailRef>,
    pub high: Option<ThumbnailRef>,
}

impl Thumbnails {
    pub fn best(&self) -> Option<&str> {
        [&self.default, &self.medium, &self.high]
            .into_iter()
            .flatten()
            .map(|t| t.url.as_str())
            .find(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ThumbnailRef {
    pub url: String,
}

/// Result of `/checkResource`. The service reports a hit by including a
/// title; a miss carries only a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckedResource {
    pub exists: bool,
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub channel_title: Option<String>,
    pub publish_time: Option<String>,
    pub message: Option<String>,
}

impl CheckedResource {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let thumbnail = value
            .get("thumbnails")
            .and_then(|t| serde_json::from_value::<Thumbnails>(t.clone()).ok())
            .and_then(|t| t.best().map(str::to_string))
            .or_else(|| text("thumbnail"));
        let title = text("title");
        Self {
            exists: title.is_some(),
            video_id: text("videoId"),
            title,
            description: text("description"),
            thumbnail,
            channel_title: text("channelTitle"),
            publish_time: text("publishTime"),
            message: text("message"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VideoStats {
    #[serde(default, deserialize_with = "lenient_text")]
    pub views: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub likes: Option<String>,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

fn lenient_text<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Turns a `response` field into display text. Objects are pretty-printed so
/// the plan parser can still find them.
fn response_text(endpoint: &'static str, value: Option<&Value>) -> Result<String, BackendError> {
    let text = match value {
        None | Some(Value::Null) => return Err(BackendError::Empty { endpoint }),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string_pretty(other).map_err(|e| BackendError::Decode {
            endpoint,
            detail: e.to_string(),
        })?,
    };
    if text.trim().is_empty() {
        return Err(BackendError::Empty { endpoint });
    }
    Ok(text)
}

fn optional_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(Value::String(_)) => None,
        Some(other) => Some(other.to_string()),
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        body: &T,
    ) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(endpoint, "POST");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| BackendError::Transport { endpoint, source })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status, "backend returned an error status");
            return Err(BackendError::Status {
                endpoint,
                status,
                body,
            });
        }

        response.json::<Value>().await.map_err(|e| BackendError::Decode {
            endpoint,
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn respond(&self, participant: &str, message: &str) -> Result<String, BackendError> {
        let body = MessageRequest {
            user_message: Some(message),
            participant_id: participant,
        };
        let v = self.post("/response", &body).await?;
        response_text("/response", v.get("response"))
    }

    async fn critique(&self, participant: &str) -> Result<String, BackendError> {
        let body = MessageRequest {
            user_message: None,
            participant_id: participant,
        };
        let v = self.post("/response/critique", &body).await?;
        response_text("/response/critique", v.get("response"))
    }

    async fn improve(&self, participant: &str) -> Result<String, BackendError> {
        let body = MessageRequest {
            user_message: None,
            participant_id: participant,
        };
        let v = self.post("/response/improved", &body).await?;
        response_text("/response/improved", v.get("response"))
    }

    async fn info(&self, message: &str) -> Result<String, BackendError> {
        let body = InfoRequest {
            info_message: message,
            participant_id: None,
        };
        let v = self.post("/info", &body).await?;
        response_text("/info", v.get("response"))
    }

    async fn search(
        &self,
        query: &str,
        participant: Option<&str>,
    ) -> Result<Vec<SearchItem>, BackendError> {
        let body = SearchRequest {
            search_message: query,
            participant_id: participant,
        };
        let v = self.post("/search", &body).await?;
        let items = v
            .get("response")
            .and_then(|r| r.get("items"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(items).map_err(|e| BackendError::Decode {
            endpoint: "/search",
            detail: e.to_string(),
        })
    }

    async fn check_resource(
        &self,
        url: &str,
        participant: &str,
        research_query: &str,
    ) -> Result<CheckedResource, BackendError> {
        let body = CheckRequest {
            check_message: url,
            participants_id: participant,
            research_query,
        };
        let v = self.post("/checkResource", &body).await?;
        let payload = v.get("response").ok_or(BackendError::Empty {
            endpoint: "/checkResource",
        })?;
        Ok(CheckedResource::from_value(payload))
    }

    async fn thumbnail(&self, video_id: &str) -> Result<String, BackendError> {
        let v = self
            .post("/get_thumbnail", &VideoRequest { video_id })
            .await?;
        optional_text(v.get("thumbnail")).ok_or(BackendError::Empty {
            endpoint: "/get_thumbnail",
        })
    }

    async fn video_stats(&self, video_id: &str) -> Result<VideoStats, BackendError> {
        let v = self.post("/video_stats", &VideoRequest { video_id }).await?;
        serde_json::from_value(v).map_err(|e| BackendError::Decode {
            endpoint: "/video_stats",
            detail: e.to_string(),
        })
    }

    async fn topic_explanation(
        &self,
        participant: &str,
        topic: &str,
    ) -> Result<Option<String>, BackendError> {
        let body = MessageRequest {
            user_message: Some(topic),
            participant_id: participant,
        };
        let v = self.post("/topic-explanations", &body).await?;
        Ok(optional_text(v.get("explanation")))
    }

    async fn objectives(
        &self,
        participant: &str,
        topic: &str,
    ) -> Result<Option<String>, BackendError> {
        let body = MessageRequest {
            user_message: Some(topic),
            participant_id: participant,
        };
        let v = self.post("/generate-objectives", &body).await?;
        Ok(optional_text(v.get("objectives")))
    }

    async fn plan_reasoning(
        &self,
        participant: &str,
        overview: &str,
    ) -> Result<Value, BackendError> {
        let body = InfoRequest {
            info_message: overview,
            participant_id: Some(participant),
        };
        let v = self.post("/plan-reasoning", &body).await?;
        match v.get("response") {
            None | Some(Value::Null) => Err(BackendError::Empty {
                endpoint: "/plan-reasoning",
            }),
            Some(r) => Ok(r.clone()),
        }
    }
}
