//! Catalog client for Emby/Jellyfin style servers.
//!
//! Cheap to clone: the underlying `reqwest::Client` is reference counted, so
//! tasks clone a client per request instead of sharing one behind a lock.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::model::{ItemPage, MediaItem, MediaSource, ServerProfile};

const CLIENT_NAME: &str = "Ember";
const DEVICE_NAME: &str = "Terminal";
const DEVICE_ID: &str = "ember-tui-001";
const PING_PATH: &str = "/emby/System/Info/Public";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("no media source")]
    NoMediaSource,
    #[error("not signed in")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(rename = "User")]
    user: AuthUser,
    #[serde(rename = "AccessToken")]
    access_token: String,
}

#[derive(Deserialize)]
struct AuthUser {
    #[serde(rename = "Id")]
    id: String,
}

/// Builds the shared HTTP client with a fixed per-request timeout.
pub fn build_http(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

fn auth_header(token: &str) -> String {
    let mut h = format!(
        r#"MediaBrowser Client="{}", Device="{}", DeviceId="{}", Version="{}""#,
        CLIENT_NAME,
        DEVICE_NAME,
        DEVICE_ID,
        env!("CARGO_PKG_VERSION")
    );
    if !token.is_empty() {
        h.push_str(&format!(r#", Token="{}""#, token));
    }
    h
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Primary-image URL for an item.  This is the cover cache key, so it must be
/// stable for a given server, token and width.
pub fn image_url(base: &str, token: &str, item: &MediaItem, width: u32) -> Option<String> {
    let owner = item.image_owner_id()?;
    Some(format!(
        "{}/emby/Items/{}/Images/Primary?maxWidth={}&api_key={}",
        trim_base(base),
        owner,
        width,
        token
    ))
}

/// One minimal round trip against `base_url`.  Errors and non-2xx responses
/// are failures; the caller decides how to score them.
pub async fn ping(http: &reqwest::Client, base_url: &str) -> Result<Duration> {
    let url = format!("{}{}", trim_base(base_url), PING_PATH);
    let started = Instant::now();
    let resp = http.get(&url).send().await?;
    let elapsed = started.elapsed();
    if !resp.status().is_success() {
        return Err(ClientError::Status {
            status: resp.status().as_u16(),
            url,
        });
    }
    Ok(elapsed)
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
    user_id: String,
    token: String,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, profile: &ServerProfile) -> Self {
        Self {
            http,
            base: trim_base(&profile.url),
            username: profile.username.clone(),
            password: profile.password.clone(),
            user_id: profile.user_id.clone(),
            token: profile.token.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            user_id: self.user_id.clone(),
            token: self.token.clone(),
        }
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    /// Reuses the cached token when the server still accepts it, otherwise
    /// signs in with the profile's username and password.
    pub async fn connect(&mut self) -> Result<Credentials> {
        if !self.user_id.is_empty() && !self.token.is_empty() {
            match self.verify().await {
                Ok(()) => return Ok(self.credentials()),
                Err(e) => debug!("cached token rejected, signing in again: {}", e),
            }
        }
        self.authenticate().await
    }

    pub async fn authenticate(&mut self) -> Result<Credentials> {
        let body = json!({ "Username": self.username, "Pw": self.password });
        let resp: AuthResponse = self
            .send(Method::POST, "/emby/Users/AuthenticateByName", &[], Some(body))
            .await?
            .json()
            .await?;
        self.user_id = resp.user.id;
        self.token = resp.access_token;
        Ok(self.credentials())
    }

    pub async fn verify(&self) -> Result<()> {
        let path = format!("/emby/Users/{}", self.user_id()?);
        self.send(Method::GET, &path, &[], None).await?;
        Ok(())
    }

    // ── Lists ─────────────────────────────────────────────────────────────────

    pub async fn resume(&self, limit: usize) -> Result<ItemPage> {
        self.user_items(&[
            ("Recursive", "true".into()),
            ("Limit", limit.to_string()),
            ("Fields", "Overview,MediaSources,ProductionYear,UserData".into()),
            ("Filters", "IsResumable".into()),
            ("SortBy", "DatePlayed".into()),
            ("SortOrder", "Descending".into()),
            ("IncludeItemTypes", "Movie,Episode".into()),
            ("ImageTypeLimit", "1".into()),
            ("EnableImageTypes", "Primary".into()),
        ])
        .await
    }

    pub async fn favorites(&self, limit: usize) -> Result<ItemPage> {
        self.user_items(&[
            ("Recursive", "true".into()),
            ("Limit", limit.to_string()),
            ("Fields", "Overview,MediaSources,ProductionYear,UserData".into()),
            ("Filters", "IsFavorite".into()),
            ("IncludeItemTypes", "Movie,Series,Episode".into()),
            ("ImageTypeLimit", "1".into()),
            ("EnableImageTypes", "Primary".into()),
        ])
        .await
    }

    pub async fn libraries(&self) -> Result<ItemPage> {
        let path = format!("/emby/Users/{}/Views", self.user_id()?);
        let mut page: ItemPage = self.get_json(&path, &[]).await?;
        page.total = page.items.len();
        Ok(page)
    }

    pub async fn children(&self, parent_id: &str, start: usize, limit: usize) -> Result<ItemPage> {
        self.user_items(&[
            ("ParentId", parent_id.to_string()),
            ("Recursive", "true".into()),
            ("Fields", "Overview,MediaSources,ProductionYear,UserData".into()),
            ("IncludeItemTypes", "Movie,Series,Video,BoxSet,Folder".into()),
            ("SortBy", "SortName".into()),
            ("SortOrder", "Ascending".into()),
            ("StartIndex", start.to_string()),
            ("Limit", limit.to_string()),
            ("ImageTypeLimit", "1".into()),
            ("EnableImageTypes", "Primary".into()),
        ])
        .await
    }

    pub async fn search(&self, term: &str, limit: usize) -> Result<ItemPage> {
        self.user_items(&[
            ("Recursive", "true".into()),
            ("SearchTerm", term.to_string()),
            ("Limit", limit.to_string()),
            ("IncludeItemTypes", "Movie,Series,Episode".into()),
            ("Fields", "Overview,MediaSources,ProductionYear,UserData".into()),
        ])
        .await
    }

    pub async fn seasons(&self, series_id: &str) -> Result<ItemPage> {
        let path = format!("/emby/Shows/{}/Seasons", series_id);
        let query = [
            ("UserId", self.user_id()?.to_string()),
            ("Fields", "UserData".to_string()),
        ];
        self.get_json(&path, &query).await
    }

    pub async fn episodes(&self, series_id: &str, season_id: &str) -> Result<ItemPage> {
        let path = format!("/emby/Shows/{}/Episodes", series_id);
        let query = [
            ("UserId", self.user_id()?.to_string()),
            ("SeasonId", season_id.to_string()),
            ("Fields", "MediaSources,Overview,UserData".to_string()),
        ];
        self.get_json(&path, &query).await
    }

    pub async fn item(&self, item_id: &str) -> Result<MediaItem> {
        let path = format!("/emby/Users/{}/Items/{}", self.user_id()?, item_id);
        let query = [("Fields", "MediaSources,Overview,UserData".to_string())];
        self.get_json(&path, &query).await
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    pub async fn set_favorite(&self, item_id: &str, favorite: bool) -> Result<()> {
        let path = format!("/emby/Users/{}/FavoriteItems/{}", self.user_id()?, item_id);
        let method = if favorite { Method::POST } else { Method::DELETE };
        self.send(method, &path, &[], None).await?;
        Ok(())
    }

    pub async fn report_start(
        &self,
        item_id: &str,
        source_id: &str,
        session_id: &str,
        position_ticks: i64,
    ) -> Result<()> {
        let body = json!({
            "ItemId": item_id,
            "MediaSourceId": source_id,
            "CanSeek": true,
            "PlayMethod": "DirectStream",
            "PlaySessionId": session_id,
            "PositionTicks": position_ticks,
        });
        self.send(Method::POST, "/emby/Sessions/Playing", &[], Some(body))
            .await?;
        Ok(())
    }

    pub async fn report_progress(
        &self,
        item_id: &str,
        source_id: &str,
        session_id: &str,
        position_ticks: i64,
        paused: bool,
    ) -> Result<()> {
        let body = json!({
            "ItemId": item_id,
            "MediaSourceId": source_id,
            "CanSeek": true,
            "PlayMethod": "DirectStream",
            "PlaySessionId": session_id,
            "PositionTicks": position_ticks,
            "IsPaused": paused,
        });
        self.send(Method::POST, "/emby/Sessions/Playing/Progress", &[], Some(body))
            .await?;
        Ok(())
    }

    pub async fn report_stop(
        &self,
        item_id: &str,
        source_id: &str,
        session_id: &str,
        position_ticks: i64,
    ) -> Result<()> {
        let body = json!({
            "ItemId": item_id,
            "MediaSourceId": source_id,
            "PlaySessionId": session_id,
            "PositionTicks": position_ticks,
        });
        self.send(Method::POST, "/emby/Sessions/Playing/Stopped", &[], Some(body))
            .await?;
        Ok(())
    }

    // ── URLs ──────────────────────────────────────────────────────────────────

    pub fn stream_url(&self, item_id: &str, source: &MediaSource) -> String {
        format!(
            "{}/emby/Videos/{}/stream.{}?MediaSourceId={}&api_key={}&Static=true",
            self.base, item_id, source.container, source.id, self.token
        )
    }

    pub fn subtitle_url(&self, item_id: &str, source_id: &str, index: i32) -> String {
        format!(
            "{}/emby/Videos/{}/{}/Subtitles/{}/Stream.srt?api_key={}",
            self.base, item_id, source_id, index, self.token
        )
    }

    pub fn image_url(&self, item: &MediaItem, width: u32) -> Option<String> {
        image_url(&self.base, &self.token, item, width)
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    fn user_id(&self) -> Result<&str> {
        if self.user_id.is_empty() {
            Err(ClientError::NotAuthenticated)
        } else {
            Ok(&self.user_id)
        }
    }

    async fn user_items(&self, query: &[(&str, String)]) -> Result<ItemPage> {
        let path = format!("/emby/Users/{}/Items", self.user_id()?);
        self.get_json(&path, query).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        Ok(self.send(Method::GET, path, query, None).await?.json().await?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("X-Emby-Authorization", auth_header(&self.token))
            .query(query);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        debug!("{} {} -> {}", method, url, status.as_u16());
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ServerProfile {
        ServerProfile {
            name: "Home".into(),
            url: "http://media.local:8096/".into(),
            user_id: "uid".into(),
            token: "tok".into(),
            ..ServerProfile::default()
        }
    }

    #[test]
    fn test_urls_use_trimmed_base_and_token() {
        let client = CatalogClient::new(reqwest::Client::new(), &profile());
        let source = MediaSource {
            id: "src".into(),
            container: "mkv".into(),
            media_streams: Vec::new(),
        };
        assert_eq!(
            client.stream_url("it", &source),
            "http://media.local:8096/emby/Videos/it/stream.mkv?MediaSourceId=src&api_key=tok&Static=true"
        );
        assert_eq!(
            client.subtitle_url("it", "src", 4),
            "http://media.local:8096/emby/Videos/it/src/Subtitles/4/Stream.srt?api_key=tok"
        );
    }

    #[test]
    fn test_image_url_none_without_owner() {
        let item = MediaItem {
            id: "x".into(),
            ..MediaItem::default()
        };
        assert!(image_url("http://h", "t", &item, 400).is_none());
    }

    #[test]
    fn test_auth_header_includes_token_only_when_set() {
        assert!(!auth_header("").contains("Token="));
        assert!(auth_header("abc").ends_with(r#"Token="abc""#));
    }

    #[tokio::test]
    async fn test_user_calls_require_login() {
        let mut p = profile();
        p.user_id.clear();
        let client = CatalogClient::new(reqwest::Client::new(), &p);
        assert!(matches!(
            client.item("x").await,
            Err(ClientError::NotAuthenticated)
        ));
    }
}
