//! Single-page fetching and content extraction.

use std::sync::LazyLock;

use kbingest_shared::PageResult;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// Maximum body size we accept for a single page (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// Candidate containers for the main content, most specific first.
static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", "article", "[role=\"main\"]", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static H1_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("h1 selector"));

static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// A fetched page plus the outgoing links found on it.
#[derive(Debug, Clone)]
pub(crate) struct FetchedPage {
    pub page: PageResult,
    pub links: Vec<String>,
}

impl FetchedPage {
    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            page: PageResult::failed(url, error),
            links: Vec::new(),
        }
    }
}

/// Read the body chunk by chunk, giving up once it exceeds `limit` bytes.
///
/// Covers chunked responses that carry no `Content-Length`.
async fn read_body_capped(
    mut response: reqwest::Response,
    limit: u64,
) -> std::result::Result<String, String> {
    let mut body: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if (body.len() + chunk.len()) as u64 > limit {
                    return Err(format!("response too large (over {limit} bytes)"));
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => return Err(format!("body read failed: {e}")),
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Fetch a URL and turn it into a [`PageResult`]. Never errors: failures are
/// recorded on the page.
///
/// With `as_text` the body is kept verbatim whatever the content type says.
pub(crate) async fn fetch_page(client: &Client, url: &str, as_text: bool) -> FetchedPage {
    debug!(%url, "fetching page");

    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => return FetchedPage::failed(url, format!("request failed: {e}")),
    };

    let status = response.status();
    if !status.is_success() {
        return FetchedPage::failed(url, format!("HTTP {status}"));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return FetchedPage::failed(
                url,
                format!("response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"),
            );
        }
    }

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("html"));

    let body = match read_body_capped(response, MAX_RESPONSE_SIZE).await {
        Ok(b) => b,
        Err(e) => return FetchedPage::failed(url, e),
    };

    let is_html = !as_text && is_html.unwrap_or_else(|| body.trim_start().starts_with('<'));
    if !is_html {
        let title = markdown_title(&body);
        return FetchedPage {
            page: PageResult::ok(url, body).with_title(title),
            links: Vec::new(),
        };
    }

    match html_to_page(url, &body) {
        Ok(fetched) => fetched,
        Err(e) => FetchedPage::failed(url, e),
    }
}

/// Convert an HTML document to a markdown page and collect its links.
pub(crate) fn html_to_page(url: &str, html: &str) -> Result<FetchedPage, String> {
    let doc = Html::parse_document(html);

    let title = first_text(&doc, &H1_SELECTOR).or_else(|| first_text(&doc, &TITLE_SELECTOR));

    let links = match Url::parse(url) {
        Ok(base) => extract_links(&doc, &base),
        Err(_) => Vec::new(),
    };

    let content_html = CONTENT_SELECTORS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| el.html())
        .unwrap_or_else(|| html.to_string());

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "header", "footer",
        ])
        .build();

    let markdown = converter
        .convert(&content_html)
        .map_err(|e| format!("htmd conversion failed: {e}"))?;

    Ok(FetchedPage {
        page: PageResult::ok(url, markdown.trim().to_string()).with_title(title),
        links,
    })
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Title of a markdown/text document: its first `# ` heading.
pub(crate) fn markdown_title(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract all links from a document, resolved against the base URL.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SELECTOR) {
        if let Some(href) = el.value().attr("href") {
            // Skip anchors, javascript:, mailto:
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }

            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(body: &str) -> (MockServer, reqwest::Response) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/plain"))
            .mount(&server)
            .await;
        let response = Client::new().get(server.uri()).send().await.unwrap();
        (server, response)
    }

    #[tokio::test]
    async fn body_read_stops_past_the_limit() {
        let (_server, response) = serve(&"x".repeat(64)).await;
        let err = read_body_capped(response, 16).await.unwrap_err();
        assert!(err.contains("too large"), "{err}");

        let (_server, response) = serve("small body").await;
        assert_eq!(read_body_capped(response, 16).await.unwrap(), "small body");
    }

    #[test]
    fn html_page_becomes_markdown_with_title_and_links() {
        let html = r##"<html><head><title>Doc Title</title></head><body>
            <nav><a href="/nav-only">Nav</a></nav>
            <main>
                <h1>Installation</h1>
                <p>Run the installer.</p>
                <a href="/page2#part">Next</a>
                <a href="#local">Local</a>
                <a href="mailto:a@b.c">Mail</a>
            </main>
        </body></html>"##;

        let fetched = html_to_page("https://docs.example.com/install", html).unwrap();
        assert!(fetched.page.success);
        assert_eq!(fetched.page.title.as_deref(), Some("Installation"));
        assert!(fetched.page.content.contains("Run the installer."));
        assert!(!fetched.page.content.contains("Nav"));
        assert!(fetched.links.contains(&"https://docs.example.com/page2".to_string()));
        assert!(fetched.links.contains(&"https://docs.example.com/nav-only".to_string()));
        assert!(!fetched.links.iter().any(|l| l.contains('#') || l.starts_with("mailto")));
    }

    #[test]
    fn title_falls_back_to_title_tag() {
        let html = "<html><head><title>Only Title</title></head><body><p>x</p></body></html>";
        let fetched = html_to_page("https://ex.com/", html).unwrap();
        assert_eq!(fetched.page.title.as_deref(), Some("Only Title"));
    }

    #[test]
    fn markdown_title_reads_first_h1() {
        assert_eq!(
            markdown_title("\n# Example Docs\n\n## Section\n").as_deref(),
            Some("Example Docs")
        );
        assert_eq!(markdown_title("## Only h2"), None);
    }
}
