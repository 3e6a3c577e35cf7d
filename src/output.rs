use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HarvestConfig;
use crate::counts::{self, Reactions};
use crate::extract::{self, Author, CandidateItem, Image};
use crate::filter::CrawlState;
use crate::sink::DatasetSink;

/// One harvested post. The field set is fixed; placeholders we never fill stay `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub message: Option<String>,
    pub timestamp: Option<i64>,
    pub comments_count: Option<u64>,
    pub reactions_count: Option<u64>,
    pub reshare_count: Option<u64>,
    pub reactions: Option<Reactions>,
    pub author: Author,
    pub image: Option<Image>,
    pub video: Option<String>,
    pub album_preview: Option<Value>,
    pub video_files: Option<Value>,
    pub video_thumbnail: Option<String>,
    pub external_url: Option<String>,
    pub attached_event: Option<Value>,
    pub attached_post: Option<Value>,
    pub attached_post_url: Option<String>,
    pub text_format_metadata: Option<Value>,
    #[serde(rename = "scrapedAt")]
    pub scraped_at: DateTime<Utc>,
}

/// Pushed once per run, after the posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RunSummary {
    pub query: String,
    pub total: usize,
    #[serde(rename = "maxResults")]
    pub max_results: usize,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub recent_posts: bool,
}

impl RunSummary {
    pub fn new(config: &HarvestConfig, state: &CrawlState) -> Self {
        Self {
            query: config.query.clone(),
            total: state.total_emitted(),
            max_results: config.max_results,
            start_date: config.start_date.clone(),
            end_date: config.end_date.clone(),
            recent_posts: config.recent_only,
        }
    }
}

/// Dataset shape of the summary record: `{"_summary": {...}}`.
#[derive(Debug, Serialize)]
pub struct SummaryRecord<'a> {
    #[serde(rename = "_summary")]
    pub summary: &'a RunSummary,
}

/// Build the final record for an admitted candidate. Counts and the reaction breakdown
/// are parsed independently from the same text and are not reconciled.
pub fn assemble_post(item: CandidateItem, url: String, scraped_at: DateTime<Utc>) -> Post {
    let counts = counts::pick_counts(&item.raw_text);
    let reactions = counts::reactions_for(&item.raw_text);
    let post_id = item.post_id.or_else(|| extract::derive_post_id(&url));

    Post {
        post_id,
        kind: "post".to_string(),
        url,
        message: Some(item.message).filter(|m| !m.is_empty()),
        timestamp: item.timestamp,
        comments_count: counts.comments,
        reactions_count: counts.reactions,
        reshare_count: counts.shares,
        reactions,
        author: item.author,
        image: item.image,
        video: item.video,
        album_preview: None,
        video_files: None,
        video_thumbnail: item.video_thumbnail,
        external_url: None,
        attached_event: None,
        attached_post: None,
        attached_post_url: None,
        text_format_metadata: None,
        scraped_at,
    }
}

/// Hand a finished post to the sink; only a successful push marks its url as seen.
pub async fn emit(sink: &dyn DatasetSink, state: &mut CrawlState, post: Post) -> Result<()> {
    sink.push_post(&post).await?;
    state.record_emitted(&post.url);
    Ok(())
}
