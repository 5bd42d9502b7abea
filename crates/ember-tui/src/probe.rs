//! Server latency probing.
//!
//! `probe_group` pings every profile sharing a prefix at once and joins them
//! all: the caller always receives one entry per matching profile.  A failed
//! probe is recorded as `Latency::Unreachable` instead of aborting the batch.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use ember_proto::model::ServerBook;
use futures_util::future::join_all;
use ratatui::style::Color;
use tracing::debug;

use crate::theme::{latency_color, C_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Reachable(Duration),
    Unreachable,
}

impl Latency {
    pub fn from_result<E: std::fmt::Display>(result: Result<Duration, E>) -> Self {
        match result {
            Ok(d) => Latency::Reachable(d),
            Err(e) => {
                debug!("probe failed: {}", e);
                Latency::Unreachable
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            Latency::Reachable(d) => format!("{}ms", d.as_millis()),
            Latency::Unreachable => "timeout".to_string(),
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Latency::Reachable(d) => latency_color(*d),
            Latency::Unreachable => C_ERROR,
        }
    }
}

/// Profiles (index, url) whose name carries `prefix`.
pub fn group_targets(book: &ServerBook, prefix: &str) -> Vec<(usize, String)> {
    book.indices_with_prefix(prefix)
        .into_iter()
        .filter_map(|i| book.get(i).map(|s| (i, s.url.clone())))
        .collect()
}

/// Probes every profile in `prefix`'s group concurrently; `ping` performs a
/// single round trip for a base URL.
pub async fn probe_group<F, Fut>(book: &ServerBook, prefix: &str, ping: F) -> HashMap<usize, Latency>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = anyhow::Result<Duration>>,
{
    let targets = group_targets(book, prefix);
    debug!("probing {} server(s) with prefix {:?}", targets.len(), prefix);
    let probes = targets.into_iter().map(|(idx, url)| {
        let fut = ping(url);
        async move { (idx, Latency::from_result(fut.await)) }
    });
    join_all(probes).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_proto::model::ServerProfile;

    fn book(names: &[&str]) -> ServerBook {
        ServerBook {
            servers: names
                .iter()
                .map(|n| ServerProfile {
                    name: n.to_string(),
                    url: format!("http://{}", n.replace(' ', "-").to_lowercase()),
                    ..ServerProfile::default()
                })
                .collect(),
            active: 0,
        }
    }

    #[tokio::test]
    async fn test_every_member_reports_even_on_error() {
        let book = book(&["Home A", "Home B", "Home C", "Remote"]);
        let result = probe_group(&book, "Home", |url: String| async move {
            if url.ends_with("home-b") {
                anyhow::bail!("connection refused");
            }
            // Later members finish first.
            let delay = if url.ends_with("home-a") { 30 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Duration::from_millis(delay))
        })
        .await;

        assert_eq!(result.len(), 3);
        assert_eq!(result[&1], Latency::Unreachable);
        assert_eq!(result[&0], Latency::Reachable(Duration::from_millis(30)));
        assert_eq!(result[&2], Latency::Reachable(Duration::from_millis(5)));
        assert!(!result.contains_key(&3));
    }

    #[tokio::test]
    async fn test_empty_group_yields_empty_map() {
        let book = book(&["Remote"]);
        let result = probe_group(&book, "Home", |_url: String| async {
            Ok(Duration::from_millis(1))
        })
        .await;
        assert!(result.is_empty());
    }

    #[test]
    fn test_latency_colors() {
        assert_eq!(Latency::Unreachable.color(), C_ERROR);
        assert_eq!(Latency::Reachable(Duration::from_millis(1500)).color(), C_ERROR);
        assert_eq!(Latency::Reachable(Duration::from_millis(20)).label(), "20ms");
    }
}
