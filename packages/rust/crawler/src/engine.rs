//! Concurrent HTTP crawler implementing the crawl primitives.
//!
//! Fetches run in waves of at most `max_concurrent` spawned tasks. The
//! cancellation token is checked before each wave, so a cancelled crawl stops
//! after the in-flight wave drains. Failed fetches never abort a crawl: they
//! come back as `success: false` pages.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, instrument, warn};
use url::Url;

use kbingest_discovery::is_binary_url;
use kbingest_shared::{
    CancellationToken, CrawlPrimitives, IngestError, PageResult, ProgressEvent, ProgressSink,
    Result, Stage, ensure_not_cancelled, percent_of,
};

use crate::page::{FetchedPage, fetch_page};
use crate::sitemap::parse_sitemap_xml;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("kbingest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// HttpCrawler
// ---------------------------------------------------------------------------

/// reqwest-backed [`CrawlPrimitives`] implementation.
#[derive(Debug, Clone)]
pub struct HttpCrawler {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HttpCrawler {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch one wave of URLs concurrently. Results keep input order.
    async fn fetch_wave(&self, urls: &[String], as_text: bool) -> Vec<FetchedPage> {
        let mut handles = Vec::with_capacity(urls.len());

        for url in urls {
            let client = self.client.clone();
            let url = url.clone();
            let allow_localhost = self.allow_localhost;

            handles.push(tokio::spawn(async move {
                if !allow_localhost && is_ssrf_target(&url) {
                    warn!(%url, "SSRF protection: blocked");
                    return FetchedPage::failed(&url, "blocked: private or non-http target");
                }
                fetch_page(&client, &url, as_text).await
            }));
        }

        let mut pages = Vec::with_capacity(handles.len());
        for (url, handle) in urls.iter().zip(handles) {
            match handle.await {
                Ok(page) => pages.push(page),
                Err(e) => pages.push(FetchedPage::failed(url, format!("fetch task failed: {e}"))),
            }
        }
        pages
    }
}

#[async_trait]
impl CrawlPrimitives for HttpCrawler {
    #[instrument(skip_all, fields(url = %url))]
    async fn crawl_text_file(
        &self,
        url: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        ensure_not_cancelled(cancel)?;
        progress
            .send(ProgressEvent::new(Stage::Crawling, 0, format!("Fetching {url}")))
            .await;

        let pages: Vec<PageResult> = self
            .fetch_wave(&[url.to_string()], true)
            .await
            .into_iter()
            .map(|f| f.page)
            .collect();

        progress
            .send(ProgressEvent::new(Stage::Crawling, 100, "Text file fetched").with_pages(1, 1))
            .await;
        Ok(pages)
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn parse_sitemap(&self, url: &str) -> Result<Vec<String>> {
        if !self.allow_localhost && is_ssrf_target(url) {
            return Err(IngestError::validation(format!(
                "refusing to fetch private or non-http sitemap: {url}"
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Network(format!("{url}: body read failed: {e}")))?;

        let urls = parse_sitemap_xml(&body);
        info!(count = urls.len(), "parsed sitemap");
        Ok(urls)
    }

    #[instrument(skip_all, fields(total = urls.len(), max_concurrent = max_concurrent))]
    async fn crawl_batch(
        &self,
        urls: &[String],
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        link_text_fallbacks: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        let max_concurrent = max_concurrent.max(1);
        let total = urls.len();
        let mut pages = Vec::with_capacity(total);

        info!(total, max_concurrent, "starting batch crawl");
        progress
            .send(
                ProgressEvent::new(Stage::Crawling, 0, format!("Crawling {total} pages"))
                    .with_pages(0, total),
            )
            .await;

        for wave in urls.chunks(max_concurrent) {
            ensure_not_cancelled(cancel)?;

            for fetched in self.fetch_wave(wave, false).await {
                let mut page = fetched.page;
                if page.title.is_none() {
                    page.title = link_text_fallbacks
                        .get(&page.url)
                        .filter(|t| !t.trim().is_empty())
                        .cloned();
                }
                pages.push(page);
            }

            let done = pages.len();
            progress
                .send(
                    ProgressEvent::new(
                        Stage::Crawling,
                        percent_of(done, total),
                        format!("Crawled {done}/{total} pages"),
                    )
                    .with_pages(done, total),
                )
                .await;
        }

        let failed = pages.iter().filter(|p| !p.success).count();
        info!(fetched = total - failed, failed, "batch crawl completed");
        Ok(pages)
    }

    #[instrument(
        skip_all,
        fields(start = start_urls.len(), max_depth = max_depth, max_concurrent = max_concurrent)
    )]
    async fn crawl_recursive(
        &self,
        start_urls: &[String],
        max_depth: u32,
        max_concurrent: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageResult>> {
        let max_concurrent = max_concurrent.max(1);
        let scope = CrawlScope::new(start_urls);
        let mut visited = HashSet::new();
        let mut level: Vec<String> = start_urls
            .iter()
            .filter(|u| visited.insert(normalize_url(u)))
            .cloned()
            .collect();
        let mut pages: Vec<PageResult> = Vec::new();
        let levels = u64::from(max_depth) + 1;
        let mut depth: u32 = 0;

        info!(max_depth, max_concurrent, "starting recursive crawl");

        while !level.is_empty() {
            let mut next = Vec::new();
            let level_len = level.len();
            let mut level_done = 0usize;

            for wave in level.chunks(max_concurrent) {
                ensure_not_cancelled(cancel)?;

                for fetched in self.fetch_wave(wave, false).await {
                    // Enqueue child links if within depth
                    if depth < max_depth && fetched.page.success {
                        for link in fetched.links {
                            if scope.in_scope(&link)
                                && !is_binary_url(&link)
                                && visited.insert(normalize_url(&link))
                            {
                                next.push(link);
                            }
                        }
                    }
                    pages.push(fetched.page);
                }

                level_done += wave.len();
                let within_level = (level_done * 100 / level_len) as u64;
                let percent = ((u64::from(depth) * 100 + within_level) / levels).min(100) as u8;
                let known = pages.len() + (level_len - level_done) + next.len();
                progress
                    .send(
                        ProgressEvent::new(
                            Stage::Crawling,
                            percent,
                            format!("Crawled {} pages at depth {depth}", pages.len()),
                        )
                        .with_pages(pages.len(), known),
                    )
                    .await;
            }

            level = next;
            depth += 1;
        }

        let failed = pages.iter().filter(|p| !p.success).count();
        info!(
            pages = pages.len(),
            failed,
            depth_reached = depth.saturating_sub(1),
            "recursive crawl completed"
        );
        Ok(pages)
    }
}

// ---------------------------------------------------------------------------
// Scope checking
// ---------------------------------------------------------------------------

/// Recursive crawls stay on the hosts of their start URLs.
struct CrawlScope {
    hosts: HashSet<String>,
}

impl CrawlScope {
    fn new(start_urls: &[String]) -> Self {
        let hosts = start_urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(str::to_ascii_lowercase))
            .collect();
        Self { hosts }
    }

    fn in_scope(&self, url: &str) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        url.host_str()
            .is_some_and(|h| self.hosts.contains(&h.to_ascii_lowercase()))
    }
}

/// Normalize a URL for deduplication (strip fragment, trailing slash, lowercase host).
fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.trim_end_matches('/').to_string();
    };
    parsed.set_fragment(None);
    let mut s = parsed.to_string();
    // Remove trailing slash for consistency (except root path)
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return true;
    };

    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod crawler_tests {
    use std::sync::Mutex;

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn send(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Cancels the token on the first event that reports progress.
    struct CancelOnProgress {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ProgressSink for CancelOnProgress {
        async fn send(&self, event: ProgressEvent) {
            if event.progress > 0 {
                self.cancel.cancel();
            }
        }
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn crawler() -> HttpCrawler {
        HttpCrawler::new().unwrap().allow_localhost()
    }

    #[test]
    fn test_normalize_url() {
        let normalized = normalize_url("https://docs.example.com/guide/intro/#section-1");
        assert_eq!(normalized, "https://docs.example.com/guide/intro");
        assert_eq!(normalize_url("https://docs.example.com/"), "https://docs.example.com/");
    }

    #[test]
    fn test_ssrf_protection() {
        assert!(is_ssrf_target("file:///etc/passwd"));
        assert!(is_ssrf_target("http://192.168.1.1/admin"));
        assert!(is_ssrf_target("http://10.0.0.1/"));
        assert!(is_ssrf_target("http://127.0.0.1:8080/"));
        assert!(is_ssrf_target("http://[::1]/"));
        assert!(is_ssrf_target("http://localhost:3000/api"));
        assert!(!is_ssrf_target("https://docs.example.com/page"));
    }

    #[test]
    fn test_scope_same_host() {
        let scope = CrawlScope::new(&["https://docs.example.com/guide/".to_string()]);
        assert!(scope.in_scope("https://docs.example.com/guide/intro"));
        assert!(scope.in_scope("http://DOCS.example.com/other"));
        assert!(!scope.in_scope("https://other.example.com/guide/intro"));
        assert!(!scope.in_scope("ftp://docs.example.com/file"));
    }

    #[tokio::test]
    async fn blocked_without_localhost_opt_in() {
        let server = MockServer::start().await;
        mount(&server, "/", html("<h1>Hi</h1>")).await;

        let crawler = HttpCrawler::new().unwrap();
        let pages = crawler
            .crawl_batch(
                &[server.uri()],
                2,
                &RecordingSink::default(),
                &HashMap::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert!(!pages[0].success);
    }

    #[tokio::test]
    async fn text_file_is_kept_verbatim() {
        let server = MockServer::start().await;
        let body = "# Example Docs\n\n- [A](https://a.org)\n";
        mount(
            &server,
            "/llms.txt",
            ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html"),
        )
        .await;

        let sink = RecordingSink::default();
        let url = format!("{}/llms.txt", server.uri());
        let pages = crawler()
            .crawl_text_file(&url, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert!(pages[0].success);
        assert_eq!(pages[0].content, body);
        assert_eq!(pages[0].title.as_deref(), Some("Example Docs"));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.last().map(|e| e.progress), Some(100));
    }

    #[tokio::test]
    async fn sitemap_is_fetched_and_parsed() {
        let server = MockServer::start().await;
        let xml = format!(
            "<urlset><url><loc>{0}/a</loc></url><url><loc>{0}/b</loc></url></urlset>",
            server.uri()
        );
        mount(
            &server,
            "/sitemap.xml",
            ResponseTemplate::new(200).set_body_raw(xml.into_bytes(), "application/xml"),
        )
        .await;
        mount(&server, "/missing-sitemap.xml", ResponseTemplate::new(404)).await;

        let crawler = crawler();
        let urls = crawler
            .parse_sitemap(&format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap();
        assert_eq!(
            urls,
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())]
        );

        let err = crawler
            .parse_sitemap(&format!("{}/missing-sitemap.xml", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Network(_)));
    }

    #[tokio::test]
    async fn batch_keeps_order_records_failures_and_applies_fallback_titles() {
        let server = MockServer::start().await;
        mount(&server, "/one", html("<main><h1>One</h1><p>first</p></main>")).await;
        mount(&server, "/gone", ResponseTemplate::new(404)).await;
        mount(
            &server,
            "/plain",
            ResponseTemplate::new(200).set_body_raw(b"no heading here".to_vec(), "text/plain"),
        )
        .await;

        let urls: Vec<String> = ["/one", "/gone", "/plain"]
            .iter()
            .map(|p| format!("{}{p}", server.uri()))
            .collect();
        let fallbacks = HashMap::from([(urls[2].clone(), "Plain Page".to_string())]);
        let sink = RecordingSink::default();

        let pages = crawler()
            .crawl_batch(&urls, 2, &sink, &fallbacks, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].title.as_deref(), Some("One"));
        assert!(pages[0].content.contains("first"));
        assert!(!pages[1].success);
        assert!(pages[1].error.as_deref().unwrap_or_default().contains("404"));
        assert_eq!(pages[2].title.as_deref(), Some("Plain Page"));

        let events = sink.events.lock().unwrap();
        // start event plus one per wave
        assert_eq!(events.len(), 3);
        assert_eq!(events.last().map(|e| e.progress), Some(100));
        assert_eq!(events.last().and_then(|e| e.processed_pages), Some(3));
    }

    #[tokio::test]
    async fn batch_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = crawler()
            .crawl_batch(
                &["https://docs.example.com/".to_string()],
                1,
                &RecordingSink::default(),
                &HashMap::new(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn recursive_crawl_respects_depth() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<main><h1>Root</h1><a href="/page2">Page 2</a></main>"#)).await;
        mount(
            &server,
            "/page2",
            html(r#"<main><h1>Page 2</h1><a href="/page3">Page 3</a></main>"#),
        )
        .await;
        mount(&server, "/page3", html("<main><h1>Page 3</h1><p>Deep page</p></main>")).await;

        let start = vec![format!("{}/", server.uri())];

        // Depth 1 = root + 1 level deep
        let pages = crawler()
            .crawl_recursive(&start, 1, 2, &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        let titles: Vec<_> = pages.iter().filter_map(|p| p.title.as_deref()).collect();
        assert_eq!(titles, vec!["Root", "Page 2"]);

        let pages = crawler()
            .crawl_recursive(&start, 3, 2, &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
    }

    #[tokio::test]
    async fn recursive_crawl_dedups_and_skips_offsite_and_binary_links() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html(
                r#"<main><h1>Root</h1>
                <a href="/">Self</a>
                <a href="/guide">Guide</a>
                <a href="/guide/#intro">Guide again</a>
                <a href="/manual.pdf">PDF</a>
                <a href="https://elsewhere.example.org/">Offsite</a>
                </main>"#,
            ),
        )
        .await;
        mount(&server, "/guide", html(r#"<main><h1>Guide</h1><a href="/">Home</a></main>"#)).await;

        let sink = RecordingSink::default();
        let pages = crawler()
            .crawl_recursive(
                &[format!("{}/", server.uri())],
                5,
                4,
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.success));
        let events = sink.events.lock().unwrap();
        assert!(events.iter().all(|e| e.stage == Stage::Crawling && e.progress <= 100));
    }

    #[tokio::test]
    async fn recursive_crawl_stops_between_levels_when_cancelled() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<main><h1>Root</h1><a href="/page2">Page 2</a></main>"#)).await;
        mount(&server, "/page2", html("<main><h1>Page 2</h1></main>")).await;

        let cancel = CancellationToken::new();
        let sink = CancelOnProgress {
            cancel: cancel.clone(),
        };
        let err = crawler()
            .crawl_recursive(&[format!("{}/", server.uri())], 3, 2, &sink, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        // level 0 was fetched, level 1 never started
        let requests = server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.path(), "/");
    }
}
