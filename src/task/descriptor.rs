use crate::DispatchError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Opaque data passed through the dispatcher untouched
///
/// Descriptors may carry one for the fetch capability, and fetch outcomes may
/// carry one back to the caller inside the [`DispatchResult`](crate::DispatchResult).
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Unique identifier of one submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the first eight hex characters, used by the live monitor
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable description of one unit of work
///
/// The target domain is derived from the URL once, at construction, and is the
/// key for rate limiting and policy checks.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    id: TaskId,
    url: Url,
    domain: String,
    payload: Option<Payload>,
}

impl TaskDescriptor {
    /// Creates a descriptor for a URL
    ///
    /// # Returns
    ///
    /// * `Ok(TaskDescriptor)` - The URL has a host to derive a domain from
    /// * `Err(DispatchError::MissingDomain)` - The URL has no host
    pub fn new(url: Url) -> Result<Self, DispatchError> {
        let domain =
            extract_domain(&url).ok_or_else(|| DispatchError::MissingDomain(url.to_string()))?;

        Ok(Self {
            id: TaskId::new(),
            url,
            domain,
            payload: None,
        })
    }

    /// Parses a URL string and creates a descriptor for it
    pub fn parse(url: &str) -> Result<Self, DispatchError> {
        Self::new(Url::parse(url)?)
    }

    /// Replaces the generated identifier with a caller-chosen one
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Attaches an opaque payload for the fetch capability
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }
}

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_dispatch::task::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
