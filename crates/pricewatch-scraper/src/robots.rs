//! robots.txt compliance for target fetches.
//!
//! Rules are fetched once per origin and cached for an hour. A missing or
//! unreadable robots.txt allows everything; stores that publish one get
//! their disallow rules and crawl-delay honored before any product page is
//! requested.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pricewatch_core::PipelineConfig;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;

/// How long fetched rules stay valid for an origin.
const RULES_TTL: Duration = Duration::from_secs(3600);

/// robots.txt is small; don't let a slow store hold up the batch.
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the origin's robots.txt says about one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct AgentGroup {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

/// Parsed rules for one origin.
#[derive(Debug, Default)]
pub struct RobotsRules {
    groups: Vec<AgentGroup>,
}

impl RobotsRules {
    /// Parses robots.txt text. Unknown directives and malformed lines are
    /// skipped rather than rejected.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<AgentGroup> = Vec::new();
        let mut current: Option<AgentGroup> = None;
        let mut last_was_agent = false;

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !last_was_agent {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(AgentGroup::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                    last_was_agent = true;
                }
                "allow" => {
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.allow.push(value.to_owned());
                        }
                    }
                    last_was_agent = false;
                }
                "disallow" => {
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.disallow.push(value.to_owned());
                        }
                    }
                    last_was_agent = false;
                }
                "crawl-delay" => {
                    if let Some(group) = current.as_mut() {
                        if let Ok(secs) = value.parse::<f64>() {
                            if secs.is_finite() && secs > 0.0 {
                                group.crawl_delay = Some(Duration::from_secs_f64(secs));
                            }
                        }
                    }
                    last_was_agent = false;
                }
                _ => last_was_agent = false,
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups }
    }

    /// Whether `path` may be fetched by `user_agent`. The longest matching
    /// rule wins; allow beats disallow on a tie. No matching rule means
    /// allowed.
    #[must_use]
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };
        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|rule| path.starts_with(rule.as_str()))
                .map(String::len)
                .max()
        };
        match (longest(&group.allow), longest(&group.disallow)) {
            (Some(allow), Some(disallow)) => allow >= disallow,
            (None, Some(_)) => false,
            _ => true,
        }
    }

    /// The crawl-delay for `user_agent`, if its group declares one.
    #[must_use]
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent).and_then(|group| group.crawl_delay)
    }

    /// The most specific group for the agent: a group naming a token the
    /// agent string contains, else the `*` group.
    fn group_for(&self, user_agent: &str) -> Option<&AgentGroup> {
        let agent = user_agent.to_ascii_lowercase();
        self.groups
            .iter()
            .find(|group| {
                group
                    .agents
                    .iter()
                    .any(|token| token != "*" && agent.contains(token.as_str()))
            })
            .or_else(|| {
                self.groups
                    .iter()
                    .find(|group| group.agents.iter().any(|token| token == "*"))
            })
    }
}

struct CachedRules {
    rules: RobotsRules,
    fetched_at: Instant,
}

/// Per-origin robots.txt fetcher and cache.
pub struct RobotsGuard {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, CachedRules>>,
    ttl: Duration,
}

impl RobotsGuard {
    /// # Errors
    ///
    /// Returns [`ScrapeError::Http`] if the underlying client cannot be built.
    pub fn new(config: &PipelineConfig) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            cache: Mutex::new(HashMap::new()),
            ttl: RULES_TTL,
        })
    }

    /// Checks `url` against its origin's robots.txt, fetching and caching
    /// the rules on first contact. An unparseable URL is allowed through;
    /// the fetcher's own validation rejects it with a proper error.
    pub async fn verdict(&self, url: &str) -> RobotsVerdict {
        let Ok(parsed) = Url::parse(url) else {
            return RobotsVerdict {
                allowed: true,
                crawl_delay: None,
            };
        };
        let origin = parsed.origin().ascii_serialization();
        let path = parsed.path().to_owned();

        if let Some(verdict) = self.cached_verdict(&origin, &path) {
            return verdict;
        }

        let rules = self.fetch_rules(&origin).await;
        let verdict = RobotsVerdict {
            allowed: rules.is_allowed(&self.user_agent, &path),
            crawl_delay: rules.crawl_delay(&self.user_agent),
        };
        lock(&self.cache).insert(
            origin,
            CachedRules {
                rules,
                fetched_at: Instant::now(),
            },
        );
        verdict
    }

    fn cached_verdict(&self, origin: &str, path: &str) -> Option<RobotsVerdict> {
        let cache = lock(&self.cache);
        let cached = cache.get(origin)?;
        if cached.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(RobotsVerdict {
            allowed: cached.rules.is_allowed(&self.user_agent, path),
            crawl_delay: cached.rules.crawl_delay(&self.user_agent),
        })
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %robots_url, %err, "robots.txt unreachable, allowing");
                return RobotsRules::default();
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(url = %robots_url, status = %response.status(), "no robots.txt, allowing");
            return RobotsRules::default();
        }
        match response.text().await {
            Ok(body) => RobotsRules::parse(&body),
            Err(err) => {
                debug!(url = %robots_url, %err, "robots.txt unreadable, allowing");
                RobotsRules::default()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
