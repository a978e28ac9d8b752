//! Embedded media loading for the full-fidelity tier.
//!
//! Every remote media element in a composite is resolved before the
//! snapshot, with a per-element ceiling; a failed or slow load is
//! treated as loaded (the backend paints a placeholder) rather than
//! failing the turn.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;
use tracing::debug;

use crate::document::MediaSource;

use super::composite::Composite;

/// Per-element load ceiling.
pub const MEDIA_LOAD_TIMEOUT: Duration = Duration::from_secs(4);

/// Resolves media bytes behind a URL.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// HTTP fetcher used outside tests.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("fetching {url}"))?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("reading body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Fetcher for environments without network access; every remote
/// element simply stays unloaded.
pub struct NullFetcher;

impl MediaFetcher for NullFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        anyhow::bail!("media fetching disabled ({url})")
    }
}

/// Resolves every media element in the composite, marking the composite
/// tainted when cross-origin pixels without CORS approval actually
/// arrive. Inline sources resolve immediately; remote failures and
/// timeouts leave the element unresolved.
pub async fn resolve_media<F: MediaFetcher>(
    composite: &mut Composite,
    origin: &str,
    fetcher: &F,
) {
    let mut pending: Vec<String> = Vec::new();
    composite.card.for_each_media_mut(&mut |media| {
        match &media.source {
            MediaSource::Inline { bytes } => {
                media.resolved = Some(bytes.clone());
            }
            MediaSource::Remote { url, .. } => {
                if media.resolved.is_none() {
                    pending.push(url.clone());
                }
            }
        }
    });

    let mut fetched: HashMap<String, Vec<u8>> = HashMap::new();
    for url in pending {
        if fetched.contains_key(&url) {
            continue;
        }
        match timeout(MEDIA_LOAD_TIMEOUT, fetcher.fetch(&url)).await {
            Ok(Ok(bytes)) => {
                fetched.insert(url, bytes);
            }
            Ok(Err(err)) => {
                debug!(%url, error = %err, "media load failed; treating as loaded");
            }
            Err(_) => {
                debug!(%url, "media load timed out; treating as loaded");
            }
        }
    }

    let mut taint = composite.taint.take();
    composite.card.for_each_media_mut(&mut |media| {
        if let MediaSource::Remote { url, .. } = &media.source {
            if let Some(bytes) = fetched.get(url) {
                media.resolved = Some(bytes.clone());
                if taint.is_none() && media.source.taints_against(origin) {
                    taint = Some(url.clone());
                }
            }
        }
    });
    composite.taint = taint;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Element, MediaElement, MediaKind, Role};
    use crate::mask::MaskSet;
    use crate::profile::StyleProfile;
    use crate::render::composite::{CompositeOptions, build_composite};
    use crate::segment::Turn;

    struct MapFetcher(HashMap<String, Vec<u8>>);

    impl MediaFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no fixture for {url}"))
        }
    }

    fn composite_with(url: &str, cors: bool) -> (Document, Composite) {
        let mut doc = Document::new("https://chat.example.com/c/1");
        let user = doc.push_message(Role::User, Element::text("q"));
        let assistant = doc.push_message(
            Role::Assistant,
            Element::block(vec![Element::Media(MediaElement::new(
                MediaKind::Image,
                MediaSource::Remote {
                    url: url.into(),
                    cors,
                },
            ))]),
        );
        let turn = Turn {
            uid: uuid::Uuid::new_v4(),
            user,
            assistant: vec![assistant],
        };
        let profile = StyleProfile::default();
        let mask = MaskSet::compile(&profile.mask_rules, false).unwrap();
        let composite =
            build_composite(&doc, &turn, &profile, &mask, CompositeOptions::full()).unwrap();
        (doc, composite)
    }

    #[tokio::test]
    async fn fetched_cross_origin_media_taints() {
        let url = "https://cdn.example.net/pic.png";
        let (doc, mut composite) = composite_with(url, false);
        let fetcher = MapFetcher(HashMap::from([(url.to_string(), vec![1, 2, 3])]));

        resolve_media(&mut composite, doc.origin(), &fetcher).await;
        assert_eq!(composite.taint.as_deref(), Some(url));
    }

    #[tokio::test]
    async fn cors_approved_media_does_not_taint() {
        let url = "https://cdn.example.net/pic.png";
        let (doc, mut composite) = composite_with(url, true);
        let fetcher = MapFetcher(HashMap::from([(url.to_string(), vec![1, 2, 3])]));

        resolve_media(&mut composite, doc.origin(), &fetcher).await;
        assert!(composite.taint.is_none());
    }

    #[tokio::test]
    async fn failed_load_is_treated_as_loaded_and_does_not_taint() {
        let url = "https://cdn.example.net/missing.png";
        let (doc, mut composite) = composite_with(url, false);

        resolve_media(&mut composite, doc.origin(), &NullFetcher).await;
        assert!(composite.taint.is_none());

        let mut unresolved = 0;
        composite.card.for_each_media_mut(&mut |m| {
            if m.resolved.is_none() {
                unresolved += 1;
            }
        });
        assert_eq!(unresolved, 1);
    }
}
