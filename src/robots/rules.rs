//! Robots.txt rule matching using the robotstxt crate

use robotstxt::DefaultMatcher;

/// Robots.txt content for one domain
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
    allow_all: bool,
}

impl RobotsRules {
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Rules that allow everything, used when robots.txt is missing or unreadable
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// # Arguments
    ///
    /// * `url` - A full URL or a path such as "/page.html"
    /// * `user_agent` - The product token to match against `User-agent` lines
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Whether the whole site is closed to `user_agent`
    pub fn disallows_site(&self, user_agent: &str) -> bool {
        !self.is_allowed("/", user_agent)
    }
}
