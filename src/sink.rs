//! Where emitted records go.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::output::{Post, RunSummary, SummaryRecord};

#[async_trait]
pub trait DatasetSink: Send + Sync {
    async fn push_post(&self, post: &Post) -> Result<()>;
    async fn push_summary(&self, summary: &RunSummary) -> Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening dataset file {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append<T: Serialize + Sync>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DatasetSink for JsonlSink {
    async fn push_post(&self, post: &Post) -> Result<()> {
        self.append(post).await
    }

    async fn push_summary(&self, summary: &RunSummary) -> Result<()> {
        self.append(&SummaryRecord { summary }).await
    }
}

/// Fans every record out to several sinks, in order.
pub struct TeeSink {
    sinks: Vec<Box<dyn DatasetSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Box<dyn DatasetSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl DatasetSink for TeeSink {
    async fn push_post(&self, post: &Post) -> Result<()> {
        for sink in &self.sinks {
            sink.push_post(post).await?;
        }
        Ok(())
    }

    async fn push_summary(&self, summary: &RunSummary) -> Result<()> {
        for sink in &self.sinks {
            sink.push_summary(summary).await?;
        }
        Ok(())
    }
}

/// Keeps everything in memory; used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    posts: Mutex<Vec<Post>>,
    summaries: Mutex<Vec<RunSummary>>,
}

#[cfg(test)]
impl MemorySink {
    pub async fn posts(&self) -> Vec<Post> {
        self.posts.lock().await.clone()
    }

    pub async fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().await.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl DatasetSink for MemorySink {
    async fn push_post(&self, post: &Post) -> Result<()> {
        self.posts.lock().await.push(post.clone());
        Ok(())
    }

    async fn push_summary(&self, summary: &RunSummary) -> Result<()> {
        self.summaries.lock().await.push(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::CandidateItem;
    use crate::output::assemble_post;
    use chrono::Utc;

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::create(dir.path().join("nested/run.jsonl")).await.unwrap();

        let post = assemble_post(
            CandidateItem::default(),
            "https://m.facebook.com/reel/123456789".into(),
            Utc::now(),
        );
        sink.push_post(&post).await.unwrap();
        sink.push_summary(&RunSummary {
            query: "q".into(),
            total: 1,
            max_results: 1,
            start_date: None,
            end_date: None,
            recent_posts: false,
        })
        .await
        .unwrap();

        let written = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["post_id"], "123456789");
        assert_eq!(lines[1]["_summary"]["total"], 1);
    }

    #[tokio::test]
    async fn tee_sink_writes_to_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        let tee = TeeSink::new(vec![
            Box::new(JsonlSink::create(&a).await.unwrap()),
            Box::new(JsonlSink::create(&b).await.unwrap()),
        ]);

        let post = assemble_post(
            CandidateItem::default(),
            "https://m.facebook.com/x/posts/7654321".into(),
            Utc::now(),
        );
        tee.push_post(&post).await.unwrap();

        for path in [a, b] {
            let written = tokio::fs::read_to_string(path).await.unwrap();
            assert_eq!(written.lines().count(), 1);
            assert!(written.contains("7654321"));
        }
    }
}
