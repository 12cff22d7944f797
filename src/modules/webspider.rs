use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::model::{ListCheck, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const DEFAULT_THREADS: usize = 10;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
struct CrawlResult {
    url: String,
    title: String,
    links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
}

pub struct WebSpider {
    core: ModuleCore,
}

impl WebSpider {
    pub fn new() -> Self {
        let options = OptionSet::new()
            .add_list("TARGETS", ListCheck::HttpUrl, true, "Start URLs, comma separated or a file path")
            .add_int("DEPTH", 1, false, "Number of link levels to fetch, 1 fetches only the targets")
            .add_flag("SAVE_HTML", false, "Keep the full HTML of every page in saved results")
            .add_text("USER_AGENT", DEFAULT_USER_AGENT, false, "User-Agent header")
            .add_list("ALLOWED_DOMAINS", ListCheck::Any, false, "Only follow links containing one of these domains")
            .add_int("THREADS", DEFAULT_THREADS as i64, false, "Pages fetched concurrently")
            .add_int("TIMEOUT", 10, false, "HTTP timeout in seconds");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "Web Spider",
                    author: "Luca Cuzzolin",
                    description: "Breadth-first web crawler collecting page titles and links",
                    prompt: "webspider",
                },
                options,
            ),
        }
    }
}

impl Default for WebSpider {
    fn default() -> Self {
        Self::new()
    }
}

/// Title, absolute http(s) links (fragments dropped, first occurrence kept) and optionally the HTML.
fn extract_page(base: &Url, body: &str, keep_html: bool) -> (String, Vec<String>, Option<String>) {
    let document = Html::parse_document(body);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(|t| t.text().collect::<String>()))
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    let mut links = Vec::new();
    let mut seen = HashSet::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for el in document.select(&sel) {
            let Some(href) = el.value().attr("href") else { continue };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let Ok(mut resolved) = base.join(href) else { continue };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            resolved.set_fragment(None);
            let link = resolved.to_string();
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    }

    let html = keep_html.then(|| document.root_element().html());
    (title, links, html)
}

fn is_allowed(link: &str, domains: &[String]) -> bool {
    domains.is_empty() || domains.iter().any(|d| link.contains(d.as_str()))
}

async fn fetch_page(client: &reqwest::Client, url: &str, keep_html: bool) -> Option<CrawlResult> {
    let resp = client.get(url).send().await.ok()?;
    let base = resp.url().clone();
    let body = resp.text().await.ok()?;
    let (title, links, html) = extract_page(&base, &body, keep_html);
    Some(CrawlResult {
        url: url.to_string(),
        title,
        links,
        html,
    })
}

async fn crawl_level(
    urls: Vec<String>,
    pool: PoolConfig,
    cancel: &CancellationToken,
    client: Arc<reqwest::Client>,
    keep_html: bool,
) -> Vec<CrawlResult> {
    run_pool(urls, pool, cancel, move |url| {
        let client = client.clone();
        async move { fetch_page(&client, &url, keep_html).await.into_iter().collect::<Vec<_>>() }
    })
    .await
}

fn page_rows(pages: &[CrawlResult]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for page in pages {
        rows.push(vec![page.url.clone(), page.title.clone(), format!("{} links", page.links.len())]);
        for link in &page.links {
            rows.push(vec![format!("  {link}"), String::new(), String::new()]);
        }
    }
    rows
}

#[async_trait]
impl Module for WebSpider {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let depth = opts.int("DEPTH").unwrap_or(1).max(1);
        let keep_html = opts.flag("SAVE_HTML");
        let allowed = opts.list("ALLOWED_DOMAINS");
        let pool = PoolConfig::new(opts.int("THREADS"), DEFAULT_THREADS);
        let secs = opts.int("TIMEOUT").filter(|s| *s > 0).unwrap_or(10) as u64;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs))
            .user_agent(opts.text("USER_AGENT"))
            .build()
            .map_err(|e| ModuleError::setup(format!("failed to build HTTP client: {e}")))?;
        let client = Arc::new(client);

        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = Vec::new();
        for target in opts.list("TARGETS") {
            if !frontier.contains(&target) {
                frontier.push(target);
            }
        }

        let mut pages = Vec::new();
        for level in 0..depth {
            if frontier.is_empty() || cancel.is_cancelled() {
                break;
            }
            visited.extend(frontier.iter().cloned());
            debug!(level, urls = frontier.len(), "crawling level");
            let found = crawl_level(std::mem::take(&mut frontier), pool, &cancel, client.clone(), keep_html).await;

            if level + 1 < depth {
                let mut queued = HashSet::new();
                for link in found.iter().flat_map(|p| p.links.iter()) {
                    if is_allowed(link, &allowed) && !visited.contains(link) && queued.insert(link.clone()) {
                        frontier.push(link.clone());
                    }
                }
            }
            pages.extend(found);
        }

        let table =
            ResultTable::with_header(["URL", "TITLE", "TOTAL LINKS"], page_rows(&pages)).with_items(pages.len());
        RunOutput::table(table).with_records(&pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const HOME: &str = r##"<html><head><title> Home </title></head><body>
        <a href="/about#team">About</a>
        <a href="/about">About again</a>
        <a href="#top">Top</a>
        <a href="javascript:void(0)">JS</a>
        <a href="mailto:ops@example.com">Mail</a>
        <a href="https://other.org/x">Elsewhere</a>
    </body></html>"##;

    #[test]
    fn links_are_resolved_and_filtered() {
        let base = Url::parse("http://site.test/index.html").unwrap();
        let (title, links, html) = extract_page(&base, HOME, false);
        assert_eq!(title, "Home");
        assert_eq!(links, vec!["http://site.test/about", "https://other.org/x"]);
        assert!(html.is_none());
    }

    #[test]
    fn allowed_domains_match_by_substring() {
        let allowed = vec!["site.test".to_string()];
        assert!(is_allowed("http://site.test/a", &allowed));
        assert!(!is_allowed("https://other.org/x", &allowed));
        assert!(is_allowed("https://other.org/x", &[]));
    }

    #[tokio::test]
    async fn depth_controls_how_far_links_are_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><title>About</title><a href='/'>home</a></html>"),
            )
            .mount(&server)
            .await;

        let spider = WebSpider::new();
        spider.set("TARGETS", &format!("{}/", server.uri())).unwrap();
        spider.set("ALLOWED_DOMAINS", "127.0.0.1").unwrap();

        let table = spider.run(CancellationToken::new()).await;
        assert_eq!(table.header, vec!["URL", "TITLE", "TOTAL LINKS"]);
        assert_eq!(table.rows[0][1], "Home");
        assert_eq!(table.rows[0][2], "2 links");
        assert_eq!(table.len(), 3);
        assert_eq!(table.items, 1);

        spider.set("DEPTH", "3").unwrap();
        spider.set("SAVE_HTML", "true").unwrap();
        let table = spider.run(CancellationToken::new()).await;
        let titles: Vec<_> = table.rows.iter().filter(|r| !r[1].is_empty()).map(|r| r[1].as_str()).collect();
        assert_eq!(titles, vec!["Home", "About"]);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("crawl.json");
        spider.save(&out).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 2);
        assert!(saved[1]["html"].as_str().unwrap().contains("About"));
    }

    #[tokio::test]
    async fn stop_between_levels_keeps_fetched_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><title>About</title></html>")
                    .set_delay(Duration::from_secs(4)),
            )
            .mount(&server)
            .await;

        let spider = WebSpider::new();
        spider.set("TARGETS", &format!("{}/", server.uri())).unwrap();
        spider.set("ALLOWED_DOMAINS", "127.0.0.1").unwrap();
        spider.set("DEPTH", "2").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let table = spider.run(cancel).await;
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert_eq!(table.items, 1);
        assert_eq!(table.rows[0][1], "Home");
    }

    #[test]
    fn http_targets_are_required() {
        let spider = WebSpider::new();
        assert!(spider.set("TARGETS", "ftp://example.com").is_err());
        assert!(spider.set("TARGETS", "https://example.com,http://example.org").is_ok());
    }
}
