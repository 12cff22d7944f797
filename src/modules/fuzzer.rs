use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::lists;
use crate::model::{ListCheck, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, LOCATION};
use reqwest::{redirect, Method};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_THREADS: usize = 40;
const KEYWORD: &str = "FUZZ";
const DEFAULT_MATCH_STATUS: &str = "200,301,302,307,401,403,405";
const CALIBRATION_PROBES: usize = 3;

pub struct Fuzzer {
    core: ModuleCore,
}

impl Fuzzer {
    pub fn new() -> Self {
        let options = OptionSet::new()
            .add_text("URL", "", true, "Target URL, FUZZ marks the injection point")
            .add_list("WORDLIST", ListCheck::Any, true, "Payloads, comma separated or a file path")
            .add_text("METHOD", "GET", false, "HTTP method")
            .add_text("HEADERS", "", false, "Extra headers as 'Name: value' pairs separated by ','")
            .add_text("COOKIE", "", false, "Cookie header value")
            .add_text("DATA", "", false, "Request body, FUZZ is substituted")
            .add_text("EXTENSIONS", "", false, "Extensions appended to every word, e.g. .php,.bak")
            .add_flag("FOLLOW_REDIRECTS", false, "Follow HTTP redirects")
            .add_flag("AUTO_CALIBRATE", false, "Filter responses that look like random-path responses")
            .add_int("THREADS", DEFAULT_THREADS as i64, false, "Concurrent requests")
            .add_int("TIMEOUT", 10, false, "HTTP timeout in seconds")
            .add_numbers("MATCHER_STATUS", DEFAULT_MATCH_STATUS, "Match these status codes")
            .add_numbers("MATCHER_SIZE", "", "Match these response sizes")
            .add_numbers("MATCHER_WORDS", "", "Match these word counts")
            .add_numbers("MATCHER_LINES", "", "Match these line counts")
            .add_pattern("MATCHER_REGEXP", "Match bodies against this regexp")
            .add_numbers("FILTER_STATUS", "", "Drop these status codes")
            .add_numbers("FILTER_SIZE", "", "Drop these response sizes")
            .add_numbers("FILTER_WORDS", "", "Drop these word counts")
            .add_numbers("FILTER_LINES", "", "Drop these line counts")
            .add_pattern("FILTER_REGEXP", "Drop bodies matching this regexp");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "Fuzzer",
                    author: "Luca Cuzzolin",
                    description: "HTTP fuzzer substituting wordlist entries at the FUZZ keyword",
                    prompt: "fuzzer",
                },
                options,
            ),
        }
    }
}

impl Default for Fuzzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Measurements of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResponseStats {
    status: u16,
    size: u64,
    words: u64,
    lines: u64,
}

impl ResponseStats {
    fn of(status: u16, body: &str) -> Self {
        Self {
            status,
            size: body.len() as u64,
            words: body.split_whitespace().count() as u64,
            lines: if body.is_empty() { 0 } else { body.lines().count() as u64 },
        }
    }
}

/// One side of the match/filter pair. Empty fields are ignored.
#[derive(Debug, Default)]
struct Criteria {
    status: Vec<u64>,
    size: Vec<u64>,
    words: Vec<u64>,
    lines: Vec<u64>,
    regexp: Option<Regex>,
}

impl Criteria {
    fn from_options(opts: &OptionSet, prefix: &str) -> Result<Self, ModuleError> {
        let numbers = |field: &str| lists::parse_numbers(&opts.text(&format!("{prefix}_{field}"))).unwrap_or_default();
        let pattern = opts.text(&format!("{prefix}_REGEXP"));
        let regexp = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(&pattern).map_err(|e| ModuleError::setup(format!("{prefix}_REGEXP: {e}")))?)
        };
        Ok(Self {
            status: numbers("STATUS"),
            size: numbers("SIZE"),
            words: numbers("WORDS"),
            lines: numbers("LINES"),
            regexp,
        })
    }

    fn is_empty(&self) -> bool {
        self.status.is_empty()
            && self.size.is_empty()
            && self.words.is_empty()
            && self.lines.is_empty()
            && self.regexp.is_none()
    }

    fn any(&self, stats: &ResponseStats, body: &str) -> bool {
        self.status.contains(&u64::from(stats.status))
            || self.size.contains(&stats.size)
            || self.words.contains(&stats.words)
            || self.lines.contains(&stats.lines)
            || self.regexp.as_ref().is_some_and(|re| re.is_match(body))
    }
}

#[derive(Debug, Default)]
struct Rules {
    matchers: Criteria,
    filters: Criteria,
    /// (status, size) pairs seen for random payloads.
    calibration: Vec<(u16, u64)>,
}

impl Rules {
    fn keep(&self, stats: &ResponseStats, body: &str) -> bool {
        if self.calibration.contains(&(stats.status, stats.size)) {
            return false;
        }
        let matched = self.matchers.is_empty() || self.matchers.any(stats, body);
        matched && !self.filters.any(stats, body)
    }
}

/// Ordered and compared by `url` then `payload`; measurements vary between requests.
#[derive(Debug, Clone, Serialize)]
struct FuzzHit {
    url: String,
    payload: String,
    status: u16,
    size: u64,
    words: u64,
    lines: u64,
    duration_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    redirect: String,
}

impl FuzzHit {
    fn key(&self) -> (&str, &str) {
        (&self.url, &self.payload)
    }

    fn rows(&self) -> Vec<Vec<String>> {
        let mut rows = vec![
            vec![format!("Url: {}", self.url)],
            vec![format!("Status: {}", self.status)],
            vec![format!("Size: {}", self.size)],
            vec![format!("Words: {}", self.words)],
            vec![format!("Lines: {}", self.lines)],
            vec![format!("Duration: {}ms", self.duration_ms)],
        ];
        if !self.redirect.is_empty() {
            rows.push(vec![format!("Redirect: {}", self.redirect)]);
        }
        rows
    }
}

impl PartialEq for FuzzHit {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FuzzHit {}

impl PartialOrd for FuzzHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FuzzHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Request template shared by every payload.
struct Target {
    client: reqwest::Client,
    method: Method,
    url: String,
    data: String,
}

struct Probe {
    url: String,
    stats: ResponseStats,
    body: String,
    elapsed: Duration,
    redirect: String,
}

impl Target {
    async fn send(&self, payload: &str) -> Option<Probe> {
        let url = self.url.replace(KEYWORD, payload);
        let mut request = self.client.request(self.method.clone(), &url);
        if !self.data.is_empty() {
            request = request.body(self.data.replace(KEYWORD, payload));
        }

        let started = Instant::now();
        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(url = %url, "request failed: {e}");
                return None;
            }
        };
        let status = resp.status().as_u16();
        let redirect = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().await.unwrap_or_default();
        Some(Probe {
            url,
            stats: ResponseStats::of(status, &body),
            body,
            elapsed: started.elapsed(),
            redirect,
        })
    }
}

/// Words followed by every word+extension combination, first occurrence kept.
fn payloads(words: &[String], extensions: &[String]) -> Vec<String> {
    let combined = words
        .iter()
        .cloned()
        .chain(extensions.iter().flat_map(|ext| words.iter().map(move |w| format!("{w}{ext}"))));
    let mut seen = HashSet::new();
    combined.filter(|p| seen.insert(p.clone())).collect()
}

fn parse_headers(raw: &str) -> Result<HeaderMap, ModuleError> {
    let mut headers = HeaderMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair
            .split_once(':')
            .ok_or_else(|| ModuleError::setup(format!("invalid header '{pair}', expected 'Name: value'")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ModuleError::setup(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| ModuleError::setup(format!("invalid header value in '{pair}': {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

async fn calibrate(target: &Target) -> Vec<(u16, u64)> {
    let tokens: Vec<String> = (0..CALIBRATION_PROBES).map(|_| random_token()).collect();
    let probes = futures::future::join_all(tokens.iter().map(|t| target.send(t))).await;
    let mut signatures: Vec<(u16, u64)> = probes
        .into_iter()
        .flatten()
        .map(|p| (p.stats.status, p.stats.size))
        .collect();
    signatures.sort_unstable();
    signatures.dedup();
    signatures
}

#[async_trait]
impl Module for Fuzzer {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let url = opts.text("URL");
        if !url.contains(KEYWORD) {
            return Err(ModuleError::setup(format!("URL must contain the {KEYWORD} keyword")));
        }
        let method = Method::from_bytes(opts.text("METHOD").trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ModuleError::setup(format!("invalid method {}", opts.text("METHOD"))))?;

        let mut headers = parse_headers(&opts.text("HEADERS"))?;
        let cookie = opts.text("COOKIE");
        if !cookie.is_empty() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| ModuleError::setup(format!("invalid cookie: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let secs = opts.int("TIMEOUT").filter(|s| *s > 0).unwrap_or(10) as u64;
        let policy = if opts.flag("FOLLOW_REDIRECTS") {
            redirect::Policy::limited(10)
        } else {
            redirect::Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs))
            .default_headers(headers)
            .redirect(policy)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ModuleError::setup(format!("failed to build HTTP client: {e}")))?;

        let target = Target {
            client,
            method,
            url,
            data: opts.text("DATA"),
        };

        let mut rules = Rules {
            matchers: Criteria::from_options(&opts, "MATCHER")?,
            filters: Criteria::from_options(&opts, "FILTER")?,
            calibration: Vec::new(),
        };
        if opts.flag("AUTO_CALIBRATE") {
            rules.calibration = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cancelled during calibration");
                    return Ok(RunOutput::table(ResultTable::default()));
                }
                signatures = calibrate(&target) => signatures,
            };
            debug!(signatures = ?rules.calibration, "auto calibration");
        }

        let extensions: Vec<String> = opts
            .text("EXTENSIONS")
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        let payloads = payloads(&opts.list("WORDLIST"), &extensions);
        let pool = PoolConfig::new(opts.int("THREADS"), DEFAULT_THREADS);
        debug!(payloads = payloads.len(), workers = pool.workers, "fuzzing");

        let shared = Arc::new((target, rules));
        let hits = run_pool(payloads, pool, &cancel, move |payload| {
            let shared = shared.clone();
            async move {
                let (target, rules) = &*shared;
                let Some(probe) = target.send(&payload).await else {
                    return Vec::new();
                };
                if !rules.keep(&probe.stats, &probe.body) {
                    return Vec::new();
                }
                vec![FuzzHit {
                    url: probe.url,
                    payload,
                    status: probe.stats.status,
                    size: probe.stats.size,
                    words: probe.stats.words,
                    lines: probe.stats.lines,
                    duration_ms: probe.elapsed.as_millis() as u64,
                    redirect: probe.redirect,
                }]
            }
        })
        .await;

        info!(hits = hits.len(), "fuzzing complete");
        let rows = hits.iter().flat_map(FuzzHit::rows).collect();
        RunOutput::table(ResultTable::new(rows).with_items(hits.len())).with_records(&hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path, path_regex},
        Mock, MockServer, ResponseTemplate,
    };

    fn criteria(status: &[u64]) -> Criteria {
        Criteria {
            status: status.to_vec(),
            ..Criteria::default()
        }
    }

    #[test]
    fn response_counts() {
        let stats = ResponseStats::of(200, "hello world\nsecond line\n");
        assert_eq!((stats.size, stats.words, stats.lines), (24, 4, 2));
        assert_eq!(ResponseStats::of(204, "").lines, 0);
    }

    #[test]
    fn filters_win_over_matchers() {
        let body = "Not Found";
        let stats = ResponseStats::of(200, body);
        let mut rules = Rules {
            matchers: criteria(&[200]),
            ..Rules::default()
        };
        assert!(rules.keep(&stats, body));

        rules.filters.regexp = Some(Regex::new("(?i)not found").unwrap());
        assert!(!rules.keep(&stats, body));

        rules.filters = Criteria::default();
        rules.calibration = vec![(200, body.len() as u64)];
        assert!(!rules.keep(&stats, body));
    }

    #[test]
    fn no_matchers_keeps_everything_not_filtered() {
        let rules = Rules {
            filters: criteria(&[404]),
            ..Rules::default()
        };
        assert!(rules.keep(&ResponseStats::of(500, ""), ""));
        assert!(!rules.keep(&ResponseStats::of(404, ""), ""));
    }

    #[test]
    fn extensions_multiply_payloads() {
        let words = vec!["index".to_string(), "admin".to_string()];
        assert_eq!(
            payloads(&words, &[".php".into()]),
            vec!["index", "admin", "index.php", "admin.php"]
        );
    }

    #[test]
    fn repeated_payloads_are_sent_once() {
        let words = vec!["admin".to_string(), "admin".to_string(), "admin.php".to_string()];
        assert_eq!(
            payloads(&words, &[".php".into(), ".php".into()]),
            vec!["admin", "admin.php", "admin.php.php"]
        );
    }

    #[test]
    fn hits_compare_by_url_and_payload() {
        let hit = |duration_ms| FuzzHit {
            url: "http://h/admin".into(),
            payload: "admin".into(),
            status: 200,
            size: 1,
            words: 1,
            lines: 1,
            duration_ms,
            redirect: String::new(),
        };
        assert_eq!(hit(3), hit(40));
        let mut other = hit(3);
        other.payload = "zzz".into();
        assert!(hit(40) < other);
    }

    #[test]
    fn headers_are_parsed_as_name_value_pairs() {
        let headers = parse_headers("X-Test: 1, Accept: text/html").unwrap();
        assert_eq!(headers["x-test"], "1");
        assert_eq!(headers["accept"], "text/html");
        assert!(matches!(parse_headers("broken"), Err(ModuleError::Setup(_))));
    }

    #[tokio::test]
    async fn url_without_keyword_is_rejected() {
        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", "http://example.com/").unwrap();
        fuzzer.set("WORDLIST", "a").unwrap();
        let table = fuzzer.run(CancellationToken::new()).await;
        assert!(table.rows[0][0].starts_with("Error: URL must contain"));
    }

    #[tokio::test]
    async fn only_matching_paths_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("admin panel"))
            .mount(&server)
            .await;

        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", &format!("{}/FUZZ", server.uri())).unwrap();
        fuzzer.set("WORDLIST", "admin,nothing").unwrap();

        let table = fuzzer.run(CancellationToken::new()).await;
        assert_eq!(table.rows[0][0], format!("Url: {}/admin", server.uri()));
        assert_eq!(table.rows[1][0], "Status: 200");
        assert_eq!(table.len(), 6);
        assert_eq!(table.items, 1);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("fuzz.json");
        fuzzer.save(&out).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(saved[0]["payload"], "admin");
        assert_eq!(saved[0]["words"], 2);
    }

    #[tokio::test]
    async fn calibration_drops_catch_all_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("admin panel"))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("soft 404"))
            .mount(&server)
            .await;

        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", &format!("{}/FUZZ", server.uri())).unwrap();
        fuzzer.set("WORDLIST", "admin,nothing,other").unwrap();

        let table = fuzzer.run(CancellationToken::new()).await;
        assert_eq!(table.len(), 18);

        fuzzer.set("AUTO_CALIBRATE", "true").unwrap();
        let table = fuzzer.run(CancellationToken::new()).await;
        assert_eq!(table.len(), 6);
        assert!(table.rows[0][0].ends_with("/admin"));
    }

    #[tokio::test]
    async fn duplicate_words_give_one_hit_on_every_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("admin panel")
                    .set_delay(Duration::from_millis(37)),
            )
            .mount(&server)
            .await;

        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", &format!("{}/FUZZ", server.uri())).unwrap();
        fuzzer.set("WORDLIST", "admin,admin,admin,admin,admin,admin").unwrap();

        for _ in 0..3 {
            let table = fuzzer.run(CancellationToken::new()).await;
            assert_eq!(table.items, 1);
            assert_eq!(table.len(), 6);
        }
    }

    #[tokio::test]
    async fn stop_during_calibration_returns_promptly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(4)))
            .mount(&server)
            .await;

        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", &format!("{}/FUZZ", server.uri())).unwrap();
        fuzzer.set("WORDLIST", "admin").unwrap();
        fuzzer.set("AUTO_CALIBRATE", "true").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let table = fuzzer.run(cancel).await;
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert!(table.is_empty());
        assert_eq!(table.items, 0);
    }

    #[tokio::test]
    async fn redirects_are_reported_when_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
            .mount(&server)
            .await;

        let fuzzer = Fuzzer::new();
        fuzzer.set("URL", &format!("{}/FUZZ", server.uri())).unwrap();
        fuzzer.set("WORDLIST", "old").unwrap();

        let table = fuzzer.run(CancellationToken::new()).await;
        assert_eq!(table.rows[1][0], "Status: 301");
        assert_eq!(table.rows.last().unwrap()[0], "Redirect: /new");
    }
}
