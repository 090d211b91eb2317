//! Public brand pages.
//!
//! A page is loaded once per slug (brand row, tiers, all updates) and kept for
//! a short TTL. Switching tabs projects the cached content, so only the first
//! view of a page reaches the backend.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sections::BrandSection;

/// Updates shown on the overview tab
pub const OVERVIEW_UPDATES: usize = 3;

/// Everything a brand page shows, across all tabs
#[derive(Debug, Clone, PartialEq)]
pub struct BrandContent {
    pub brand_id: String,
    pub brand: Value,
    /// Ascending by amount
    pub tiers: Vec<Value>,
    /// Newest first
    pub updates: Vec<Value>,
}

impl BrandContent {
    /// Tiers and updates shown on one tab
    pub fn project(&self, section: BrandSection) -> (Vec<Value>, Vec<Value>) {
        match section {
            BrandSection::Overview => (
                self.tiers.clone(),
                self.updates.iter().take(OVERVIEW_UPDATES).cloned().collect(),
            ),
            BrandSection::Tiers => (self.tiers.clone(), Vec::new()),
            BrandSection::Updates => (Vec::new(), self.updates.clone()),
            // TODO: list supporters once contributions are stored in their own table
            BrandSection::Supporters => (Vec::new(), Vec::new()),
        }
    }
}

struct CachedPage {
    loaded_at: Instant,
    content: Arc<BrandContent>,
}

/// Brand pages by slug. A TTL of zero disables caching.
pub struct PageCache {
    ttl: Duration,
    pages: DashMap<String, CachedPage>,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pages: DashMap::new(),
        }
    }

    pub fn get(&self, slug: &str) -> Option<Arc<BrandContent>> {
        let page = self.pages.get(slug)?;
        if page.loaded_at.elapsed() < self.ttl {
            Some(page.content.clone())
        } else {
            None
        }
    }

    pub fn put(&self, slug: &str, content: BrandContent) -> Arc<BrandContent> {
        let content = Arc::new(content);
        if !self.ttl.is_zero() {
            self.pages.insert(
                slug.to_string(),
                CachedPage {
                    loaded_at: Instant::now(),
                    content: content.clone(),
                },
            );
        }
        content
    }

    /// Drop the page of a brand whose tiers or updates changed
    pub fn invalidate_brand(&self, brand_id: &str) {
        self.pages.retain(|_, page| page.content.brand_id != brand_id);
    }

    /// Remove expired pages
    pub fn prune(&self) -> usize {
        let before = self.pages.len();
        self.pages.retain(|_, page| page.loaded_at.elapsed() < self.ttl);
        before - self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub fn spawn_prune_task(cache: Arc<PageCache>, interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.prune();
            tracing::debug!(removed, pages = cache.len(), "Page cache cleanup complete");
        }
    });
}
