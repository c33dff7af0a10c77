//! Fetches discussion topics for the curated (pinned) rooms: the top Hacker
//! News story and the top daily post of two Reddit feeds. Every fetch has a
//! static fallback so room refresh never fails outright.

use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use time::OffsetDateTime;

const HN_TOP_STORIES_URL: &str = "https://hacker-news.firebaseio.com/v0/topstories.json";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const REDDIT_UA: &str = "desktop:parlor:1.0";

#[derive(Debug, Clone)]
pub struct Topic {
    pub title: String,
    pub description: String,
    pub url: String,
    pub source: String,
}

pub struct TopicService {
    client: reqwest::Client,
    reddit_token: Option<RedditToken>,
}

struct RedditToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct RedditTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct HnStory {
    id: i64,
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    by: String,
}

#[derive(Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Deserialize)]
struct RedditListingData {
    children: Vec<RedditChild>,
}

#[derive(Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Deserialize)]
struct RedditPost {
    title: String,
    #[serde(default)]
    score: i64,
    permalink: String,
}

impl TopicService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            reddit_token: None,
        }
    }

    /// One topic per curated room, in a fixed order (HN, world news, TIL).
    /// A failed fetch logs a warning and substitutes the feed's fallback.
    pub async fn fetch_all_topics(&mut self) -> Vec<Topic> {
        let mut topics = Vec::with_capacity(3);

        match self.fetch_hacker_news_top().await {
            Ok(topic) => topics.push(topic),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch HackerNews topic");
                topics.push(Topic {
                    title: "Tech News Discussion".into(),
                    description: "Discuss today's technology news".into(),
                    url: "https://news.ycombinator.com".into(),
                    source: "HackerNews".into(),
                });
            }
        }

        match self.fetch_subreddit_top("worldnews", "Top world news").await {
            Ok(topic) => topics.push(topic),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch Reddit worldnews topic");
                topics.push(Topic {
                    title: "World News Discussion".into(),
                    description: "Discuss today's global news".into(),
                    url: "https://reddit.com/r/worldnews".into(),
                    source: "Reddit WorldNews".into(),
                });
            }
        }

        match self
            .fetch_subreddit_top("todayilearned", "Today's top learning")
            .await
        {
            Ok(topic) => topics.push(topic),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch Reddit TIL topic");
                topics.push(Topic {
                    title: "Today I Learned".into(),
                    description: "Share interesting facts".into(),
                    url: "https://reddit.com/r/todayilearned".into(),
                    source: "Reddit TIL".into(),
                });
            }
        }

        topics
    }

    pub async fn fetch_hacker_news_top(&self) -> anyhow::Result<Topic> {
        let story_ids: Vec<i64> = self
            .client
            .get(HN_TOP_STORIES_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decode HN story ids")?;
        let top = *story_ids.first().ok_or_else(|| anyhow!("no HN stories found"))?;

        let story: HnStory = self
            .client
            .get(format!("https://hacker-news.firebaseio.com/v0/item/{top}.json"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decode HN story")?;

        let url = if story.url.is_empty() {
            format!("https://news.ycombinator.com/item?id={}", story.id)
        } else {
            story.url
        };

        Ok(Topic {
            title: clean_text(&story.title),
            description: format!("Top HN story with {} points by {}", story.score, story.by),
            url,
            source: "HackerNews".into(),
        })
    }

    async fn fetch_subreddit_top(
        &mut self,
        subreddit: &str,
        description: &str,
    ) -> anyhow::Result<Topic> {
        let url =
            format!("https://oauth.reddit.com/r/{subreddit}/top.json?limit=1&t=day&raw_json=1");
        let token = self.reddit_token().await?;

        let listing: RedditListing = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, REDDIT_UA)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decode r/{subreddit} listing"))?;

        let post = listing
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data)
            .ok_or_else(|| anyhow!("r/{subreddit}: empty listing"))?;

        let source = match subreddit {
            "worldnews" => "Reddit WorldNews",
            "todayilearned" => "Reddit TIL",
            _ => "Reddit",
        };

        Ok(Topic {
            title: clean_text(&post.title),
            description: format!("{description} with {} upvotes", post.score),
            url: format!("https://reddit.com{}", post.permalink),
            source: source.into(),
        })
    }

    /// Client-credentials OAuth token, cached until shortly before expiry.
    async fn reddit_token(&mut self) -> anyhow::Result<String> {
        if let Some(token) = &self.reddit_token
            && token.expires_at > OffsetDateTime::now_utc()
        {
            return Ok(token.access_token.clone());
        }

        let client_id = std::env::var("REDDIT_CLIENT_ID")
            .context("REDDIT_CLIENT_ID must be set")?;
        let client_secret = std::env::var("REDDIT_CLIENT_SECRET")
            .context("REDDIT_CLIENT_SECRET must be set")?;

        let response: RedditTokenResponse = self
            .client
            .post(REDDIT_TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::USER_AGENT, REDDIT_UA)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("decode reddit token response")?;

        let access_token = response.access_token.clone();
        self.reddit_token = Some(RedditToken {
            access_token: response.access_token,
            // Refresh a minute early.
            expires_at: OffsetDateTime::now_utc()
                + Duration::from_secs(response.expires_in.max(60) as u64 - 60),
        });
        tracing::info!("reddit OAuth token obtained");

        Ok(access_token)
    }
}

impl Default for TopicService {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the HTML entities feed titles commonly carry and trim whitespace.
fn clean_text(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_decodes_entities() {
        assert_eq!(clean_text("  Q&amp;A: &quot;why?&quot; "), "Q&A: \"why?\"");
        assert_eq!(clean_text("a &lt;b&gt; c"), "a <b> c");
    }

    #[test]
    fn hn_story_decodes_with_missing_url() {
        let story: HnStory =
            serde_json::from_str(r#"{"id": 42, "title": "A story", "score": 10, "by": "pg"}"#)
                .unwrap();
        assert_eq!(story.id, 42);
        assert!(story.url.is_empty());
    }

    #[test]
    fn reddit_listing_decodes() {
        let listing: RedditListing = serde_json::from_str(
            r#"{"data": {"children": [
                {"data": {"title": "Big news", "score": 999, "permalink": "/r/worldnews/comments/x/big_news/"}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(listing.data.children.len(), 1);
        assert_eq!(listing.data.children[0].data.title, "Big news");
    }

    #[test]
    fn token_response_decodes() {
        let token: RedditTokenResponse = serde_json::from_str(
            r#"{"access_token": "abc", "token_type": "bearer", "expires_in": 3600}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, 3600);
    }
}
