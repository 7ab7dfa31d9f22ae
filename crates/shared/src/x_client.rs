use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::fetcher::{AuthorId, FetchError, Page, PostSource};
use crate::models::Post;

/// Bearer token shipped with the x.com web client; good enough for guest access.
const PUBLIC_WEB_BEARER: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const GUEST_ACTIVATE_URL: &str = "https://api.x.com/1.1/guest/activate.json";
const USER_BY_SCREEN_NAME_URL: &str =
    "https://x.com/i/api/graphql/G3KGOASz96M-Qu0nwmGXNg/UserByScreenName";
const USER_TWEETS_URL: &str = "https://x.com/i/api/graphql/V7H0Ap3_Hh2FyS75OCDO3Q/UserTweets";

/// `created_at` as the legacy tweet object formats it: `Wed Oct 10 20:19:24 +0000 2018`
const X_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Deserialize)]
struct GuestTokenResponse {
    guest_token: String,
}

#[derive(Debug, Deserialize)]
struct UserLookupResponse {
    #[serde(default)]
    data: Option<UserLookupData>,
}

#[derive(Debug, Deserialize)]
struct UserLookupData {
    #[serde(default)]
    user: Option<UserLookupUser>,
}

#[derive(Debug, Deserialize)]
struct UserLookupUser {
    #[serde(default)]
    result: Option<UserResult>,
}

#[derive(Debug, Deserialize)]
struct UserResult {
    #[serde(default)]
    rest_id: Option<String>,
}

/// Guest-mode client for X's web GraphQL API
pub struct XClient {
    client: Client,
    bearer_token: String,
    guest_token: OnceCell<String>,
}

impl XClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; PostLabeler/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        if config.has_x_login() {
            log::info!("X login credentials are set but unused; fetching as guest");
        }

        let bearer_token = config
            .x_bearer_token
            .clone()
            .unwrap_or_else(|| PUBLIC_WEB_BEARER.to_string());

        Ok(Self {
            client,
            bearer_token,
            guest_token: OnceCell::new(),
        })
    }

    async fn guest_token(&self) -> Result<&str> {
        let token = self
            .guest_token
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(GUEST_ACTIVATE_URL)
                    .bearer_auth(&self.bearer_token)
                    .send()
                    .await
                    .context("Failed to activate X guest session")?;

                let status = response.status();
                if !status.is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| String::from("unknown error"));
                    anyhow::bail!("X guest activation failed: {} - {}", status, error_text);
                }

                let body = response
                    .json::<GuestTokenResponse>()
                    .await
                    .context("Failed to parse guest token response")?;
                log::debug!("Activated X guest session");
                Ok::<String, anyhow::Error>(body.guest_token)
            })
            .await?;
        Ok(token.as_str())
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let guest_token = self.guest_token().await?;
        Ok(request
            .bearer_auth(&self.bearer_token)
            .header("x-guest-token", guest_token)
            .header("content-type", "application/json"))
    }

    async fn get_graphql(&self, base: &str, variables: &Value) -> Result<Value> {
        let url = format!(
            "{}?variables={}&features={}",
            base,
            urlencoding::encode(&variables.to_string()),
            urlencoding::encode(&graphql_features().to_string())
        );

        let response = self
            .authorized(self.client.get(&url))
            .await?
            .send()
            .await
            .context("Failed to reach X API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("X API returned error: {} - {}", status, error_text);
        }

        response
            .json::<Value>()
            .await
            .context("Failed to parse X API response")
    }
}

#[async_trait]
impl PostSource for XClient {
    async fn lookup_author(&self, handle: &str) -> Result<AuthorId, FetchError> {
        let variables = json!({
            "screen_name": handle,
            "withSafetyModeUserFields": true,
        });
        let body = self.get_graphql(USER_BY_SCREEN_NAME_URL, &variables).await?;
        parse_user_id(body).ok_or_else(|| FetchError::AuthorNotFound(handle.to_string()))
    }

    async fn fetch_page(
        &self,
        author: &AuthorId,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<Page, FetchError> {
        let mut variables = json!({
            "userId": author.0,
            "count": count,
            "includePromotedContent": false,
            "withQuickPromoteEligibilityTweetFields": false,
            "withVoice": true,
            "withV2Timeline": true,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = Value::String(cursor.to_string());
        }

        let body = self.get_graphql(USER_TWEETS_URL, &variables).await?;
        Ok(parse_timeline(&body)?)
    }
}

fn graphql_features() -> Value {
    json!({
        "hidden_profile_likes_enabled": true,
        "hidden_profile_subscriptions_enabled": true,
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "subscriptions_verification_info_is_identity_verified_enabled": true,
        "subscriptions_verification_info_verified_since_enabled": true,
        "highlights_tweets_tab_ui_enabled": true,
        "responsive_web_twitter_article_notes_tab_enabled": true,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "rweb_tipjar_consumption_enabled": true,
        "communities_web_enable_tweet_community_results_fetch": true,
        "c9s_tweet_anatomy_moderator_badge_enabled": true,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false,
    })
}

fn parse_user_id(body: Value) -> Option<AuthorId> {
    let lookup: UserLookupResponse = serde_json::from_value(body).ok()?;
    lookup
        .data?
        .user?
        .result?
        .rest_id
        .filter(|id| !id.is_empty())
        .map(AuthorId)
}

/// Parse a `UserTweets` response into posts and the bottom cursor.
pub fn parse_timeline(body: &Value) -> Result<Page> {
    let result = body
        .pointer("/data/user/result")
        .context("Timeline response has no user result")?;
    // Older responses nest under timeline_v2, newer ones under timeline
    let instructions = result
        .pointer("/timeline_v2/timeline/instructions")
        .or_else(|| result.pointer("/timeline/timeline/instructions"))
        .and_then(Value::as_array)
        .context("Timeline response has no instructions")?;

    let mut page = Page::default();

    for instruction in instructions {
        // Items appended to a conversation module that started on an earlier page
        if let Some(module_items) = instruction.get("moduleItems").and_then(Value::as_array) {
            for module_item in module_items {
                push_tweet(&mut page, module_item, "/item/itemContent/tweet_results/result");
            }
            continue;
        }

        let entries = match instruction.get("entries").and_then(Value::as_array) {
            Some(entries) => entries,
            None => continue,
        };

        for entry in entries {
            let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");

            if entry_id.starts_with("tweet-") {
                push_tweet(&mut page, entry, "/content/itemContent/tweet_results/result");
            } else if entry_id.starts_with("profile-conversation-") {
                // A self-thread: the first item is the post, the rest are its replies
                if let Some(first) = entry.pointer("/content/items/0") {
                    push_tweet(&mut page, first, "/item/itemContent/tweet_results/result");
                }
            } else if entry_id.starts_with("cursor-bottom-") {
                page.next_cursor = entry
                    .pointer("/content/value")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
    }

    Ok(page)
}

fn push_tweet(page: &mut Page, node: &Value, pointer: &str) {
    let entry_id = node.get("entryId").and_then(Value::as_str).unwrap_or("?");
    if let Some(tweet) = node.pointer(pointer) {
        match parse_tweet(tweet) {
            Ok(post) => page.posts.push(post),
            Err(e) => log::debug!("Skipping entry {}: {:#}", entry_id, e),
        }
    }
}

fn parse_tweet(result: &Value) -> Result<Post> {
    // Tweets with visibility restrictions wrap the real tweet one level down
    let tweet = match result.get("__typename").and_then(Value::as_str) {
        Some("TweetWithVisibilityResults") => {
            result.get("tweet").context("Missing wrapped tweet")?
        }
        _ => result,
    };
    let legacy = tweet.get("legacy").context("Tweet has no legacy object")?;

    let id = legacy
        .get("id_str")
        .or_else(|| tweet.get("rest_id"))
        .and_then(Value::as_str)
        .context("Tweet has no id")?
        .to_string();

    let created_at = legacy
        .get("created_at")
        .and_then(Value::as_str)
        .context("Tweet has no created_at")?;

    // Long posts carry their full text in the note_tweet object
    let text = tweet
        .pointer("/note_tweet/note_tweet_results/result/text")
        .or_else(|| legacy.get("full_text"))
        .and_then(Value::as_str)
        .context("Tweet has no text")?
        .to_string();

    Ok(Post {
        id,
        created_at: parse_x_timestamp(created_at)?,
        text,
        retweet_count: legacy
            .get("retweet_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        favorite_count: legacy
            .get("favorite_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

pub fn parse_x_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, X_TIMESTAMP_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid X timestamp: {}", raw))
}
