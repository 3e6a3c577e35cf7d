use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dom::{DomSnapshot, ElementHandle};
use crate::site;

const PERMALINK_SELECTOR: &str = r#"a[href*="story.php"], a[href*="/posts/"], a[href*="/permalink/"], a[href*="/reel/"], a[href*="/videos/"]"#;
const AUTHOR_SELECTOR: &str = r#"header a[href^="/"]"#;
const AVATAR_SELECTOR: &str = "image, img";
const MESSAGE_SELECTOR: &str =
    r#"[data-ad-preview="message"], div[dir="auto"] p, div[dir="auto"] span"#;
const TIMESTAMP_SELECTOR: &str = "abbr[data-utime], time[data-utime]";
const VIDEO_SELECTOR: &str = r#"a[href*="/reel/"], a[href*="/videos/"]"#;

/// Shared by extraction and by the emitter's second attempt.
static POST_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:story\.php.*[?&]story_fbid=|posts/|permalink/|reel/|videos/)(\d{6,})").unwrap()
});

static PROFILE_QUERY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"profile\.php\?id=(\d+)").unwrap());
static PROFILE_PATH_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"facebook\.com/(\d{6,})").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub uri: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub id: Option<String>,
}

/// A post as scraped, before filtering and count parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateItem {
    pub url: Option<String>,
    pub post_id: Option<String>,
    pub message: String,
    pub timestamp: Option<i64>,
    /// Full container text; only the count parser reads it.
    pub raw_text: String,
    pub image: Option<Image>,
    pub video: Option<String>,
    pub video_thumbnail: Option<String>,
    pub author: Author,
}

/// First run of 6+ digits after any accepted permalink marker.
pub fn derive_post_id(url: &str) -> Option<String> {
    POST_ID.captures(url).map(|caps| caps[1].to_string())
}

pub fn derive_author_id(profile_url: &str) -> Option<String> {
    PROFILE_QUERY_ID
        .captures(profile_url)
        .or_else(|| PROFILE_PATH_ID.captures(profile_url))
        .map(|caps| caps[1].to_string())
}

/// One candidate per rendered result container.
pub fn extract_candidates(snapshot: &DomSnapshot) -> Vec<CandidateItem> {
    snapshot
        .result_containers()
        .iter()
        .map(|container| extract_candidate(container, snapshot.url()))
        .collect()
}

/// Best effort: every field that can't be resolved stays empty.
pub fn extract_candidate<E: ElementHandle>(container: &E, base_url: &str) -> CandidateItem {
    let url = container
        .find(PERMALINK_SELECTOR)
        .and_then(|a| a.attribute("href"))
        .and_then(|href| site::absolutize(&href, base_url));
    let post_id = url.as_deref().and_then(derive_post_id);

    let author_link = container.find(AUTHOR_SELECTOR);
    let author_url = author_link
        .as_ref()
        .and_then(|a| a.attribute("href"))
        .and_then(|href| site::absolutize(&href, base_url));
    let author = Author {
        id: author_url.as_deref().and_then(derive_author_id),
        name: author_link
            .as_ref()
            .map(|a| a.inner_text().replace('\n', " "))
            .filter(|name| !name.is_empty()),
        url: author_url,
        profile_picture_url: container.find(AVATAR_SELECTOR).and_then(|img| {
            img.attribute("src")
                .or_else(|| img.attribute("href"))
                .or_else(|| img.attribute("xlink:href"))
        }),
    };

    let message = container
        .find(MESSAGE_SELECTOR)
        .map(|el| el.inner_text())
        .unwrap_or_default();

    let timestamp = container
        .find(TIMESTAMP_SELECTOR)
        .and_then(|el| el.attribute("data-utime"))
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|ts| *ts > 0);

    let image = container.find("img").and_then(|img| {
        let uri = img.attribute("src").filter(|src| !src.is_empty())?;
        Some(Image {
            uri,
            height: img.attribute("height").and_then(|h| h.parse().ok()),
            width: img.attribute("width").and_then(|w| w.parse().ok()),
            id: None,
        })
    });

    let video = container
        .find(VIDEO_SELECTOR)
        .and_then(|a| a.attribute("href"))
        .and_then(|href| site::absolutize(&href, base_url));
    let video_thumbnail = video
        .as_ref()
        .and_then(|_| image.as_ref().map(|img| img.uri.clone()));

    CandidateItem {
        url,
        post_id,
        message,
        timestamp,
        raw_text: container.inner_text(),
        image,
        video,
        video_thumbnail,
        author,
    }
}
