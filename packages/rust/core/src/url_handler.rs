//! Crawl strategy dispatch by URL type.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use kbingest_discovery::{
    LinkCollectionDetector, LlmsTxtDetector, NormalizedUrlEquivalence, SelfLinkCheck, UrlKind,
    classify_url, extract_links, filter_binary_links, filter_self_links,
};
use kbingest_shared::{
    CancellationToken, CrawlPrimitives, CrawlRequest, CrawlType, PageResult, ProgressSink, Result,
    ensure_not_cancelled,
};

/// Pages produced by one crawl plus the strategy that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOutcome {
    pub pages: Vec<PageResult>,
    pub crawl_type: CrawlType,
}

impl CrawlOutcome {
    fn new(pages: Vec<PageResult>, crawl_type: CrawlType) -> Self {
        Self { pages, crawl_type }
    }
}

/// Picks a crawl strategy for a URL and runs it on the crawl primitives.
pub struct UrlTypeHandler {
    crawler: Arc<dyn CrawlPrimitives>,
    detector: Arc<dyn LinkCollectionDetector>,
    self_links: Arc<dyn SelfLinkCheck>,
    default_max_concurrent: usize,
}

impl UrlTypeHandler {
    pub fn new(crawler: Arc<dyn CrawlPrimitives>, default_max_concurrent: usize) -> Self {
        Self {
            crawler,
            detector: Arc::new(LlmsTxtDetector::default()),
            self_links: Arc::new(NormalizedUrlEquivalence),
            default_max_concurrent: default_max_concurrent.max(1),
        }
    }

    pub fn with_link_collection_detector(mut self, detector: Arc<dyn LinkCollectionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_self_link_check(mut self, check: Arc<dyn SelfLinkCheck>) -> Self {
        self.self_links = check;
        self
    }

    /// Crawl `url` with the strategy its type calls for.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn crawl_by_type(
        &self,
        url: &str,
        request: &CrawlRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome> {
        ensure_not_cancelled(cancel)?;
        let max_concurrent = request.max_concurrent_or(self.default_max_concurrent);
        let kind = classify_url(url);
        info!(kind = kind.as_str(), max_concurrent, "dispatching crawl");

        match kind {
            UrlKind::TextFile => self.crawl_text(url, max_concurrent, progress, cancel).await,
            UrlKind::Sitemap => self.crawl_sitemap(url, max_concurrent, progress, cancel).await,
            UrlKind::Webpage => {
                let pages = self
                    .crawler
                    .crawl_recursive(
                        &[url.to_string()],
                        request.max_depth(),
                        max_concurrent,
                        progress,
                        cancel,
                    )
                    .await?;
                Ok(CrawlOutcome::new(pages, CrawlType::Normal))
            }
        }
    }

    async fn crawl_text(
        &self,
        url: &str,
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome> {
        let mut pages = self.crawler.crawl_text_file(url, progress, cancel).await?;

        let Some(document) = pages.first().filter(|p| p.success) else {
            return Ok(CrawlOutcome::new(pages, CrawlType::TextFile));
        };
        if !self.detector.is_link_collection(url, &document.content) {
            return Ok(CrawlOutcome::new(pages, CrawlType::TextFile));
        }

        let links = extract_links(&document.content, url);
        info!(count = links.len(), "link collection detected");
        let links = filter_binary_links(filter_self_links(links, url, self.self_links.as_ref()));

        if links.is_empty() {
            info!("no crawlable links left after filtering");
            return Ok(CrawlOutcome::new(pages, CrawlType::TextFile));
        }

        let fallbacks: HashMap<String, String> = links
            .iter()
            .filter(|l| !l.text.is_empty())
            .map(|l| (l.url.clone(), l.text.clone()))
            .collect();
        let urls: Vec<String> = links.into_iter().map(|l| l.url).collect();

        ensure_not_cancelled(cancel)?;
        let crawled = self
            .crawler
            .crawl_batch(&urls, max_concurrent, progress, &fallbacks, cancel)
            .await?;

        pages.extend(crawled);
        Ok(CrawlOutcome::new(pages, CrawlType::LinkCollectionWithCrawledLinks))
    }

    async fn crawl_sitemap(
        &self,
        url: &str,
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome> {
        let urls = match self.crawler.parse_sitemap(url).await {
            Ok(urls) => urls,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "sitemap could not be parsed, treating as empty");
                Vec::new()
            }
        };

        if urls.is_empty() {
            info!("sitemap lists no URLs");
            return Ok(CrawlOutcome::new(Vec::new(), CrawlType::Sitemap));
        }

        ensure_not_cancelled(cancel)?;
        let pages = self
            .crawler
            .crawl_batch(&urls, max_concurrent, progress, &HashMap::new(), cancel)
            .await?;
        Ok(CrawlOutcome::new(pages, CrawlType::Sitemap))
    }
}
