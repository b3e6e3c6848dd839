//! Robots checker that fetches `/robots.txt` over HTTP

use crate::config::UserAgentConfig;
use crate::http::build_http_client;
use crate::robots::{PolicyDecision, RobotsChecker, RobotsRules};
use crate::DispatchError;
use async_trait::async_trait;
use reqwest::Client;

/// Fetches each domain's robots.txt and checks the site root
///
/// Unreachable or non-2xx robots.txt files allow everything.
#[derive(Debug, Clone)]
pub struct HttpRobotsChecker {
    client: Client,
    agent_token: String,
    scheme: String,
    port: Option<u16>,
}

impl HttpRobotsChecker {
    pub fn new(config: &UserAgentConfig) -> Result<Self, DispatchError> {
        Ok(Self::with_client(build_http_client(config)?, config))
    }

    /// Shares an existing client, matching rules against `config`'s crawler name
    pub fn with_client(client: Client, config: &UserAgentConfig) -> Self {
        Self {
            client,
            agent_token: config.crawler_name.clone(),
            scheme: "https".to_string(),
            port: None,
        }
    }

    /// Uses another scheme (such as "http") for robots.txt requests
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    /// Sends robots.txt requests to a fixed port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn robots_url(&self, domain: &str) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}/robots.txt", self.scheme, domain, port),
            None => format!("{}://{}/robots.txt", self.scheme, domain),
        }
    }

    /// Downloads and parses robots.txt for a domain
    pub async fn fetch_rules(&self, domain: &str) -> RobotsRules {
        let url = self.robots_url(domain);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Could not fetch {}: {}", url, e);
                return RobotsRules::allow_all();
            }
        };

        if !response.status().is_success() {
            tracing::debug!("{} returned {}, allowing all", url, response.status());
            return RobotsRules::allow_all();
        }

        match response.text().await {
            Ok(body) => RobotsRules::from_content(&body),
            Err(e) => {
                tracing::debug!("Could not read {}: {}", url, e);
                RobotsRules::allow_all()
            }
        }
    }
}

#[async_trait]
impl RobotsChecker for HttpRobotsChecker {
    async fn check(&self, domain: &str) -> PolicyDecision {
        if self.fetch_rules(domain).await.disallows_site(&self.agent_token) {
            PolicyDecision::Disallowed
        } else {
            PolicyDecision::Allowed
        }
    }
}
