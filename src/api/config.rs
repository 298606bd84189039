//! Shared-resource configuration.

use std::ffi::CString;
use std::fmt;
use std::time::Duration;

use super::error::ConfigError;

/// Longest name accepted by `shm_open` on Linux (NAME_MAX).
const MAX_SEGMENT_NAME: usize = 255;

/// Prefix used by [`SegmentName::for_session`].
const SESSION_PREFIX: &str = "/stagealloc.";

/// A validated POSIX shared-memory object name.
///
/// The name is the rendezvous point of a process group: every rank of one
/// group must use the same name, and unrelated groups must use different ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentName(String);

impl SegmentName {
    /// Validate a name of the form `/something`.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let reason = if !name.starts_with('/') {
            Some("must start with '/'")
        } else if name.len() < 2 {
            Some("must not be empty after '/'")
        } else if name.len() > MAX_SEGMENT_NAME {
            Some("longer than 255 bytes")
        } else if name[1..].contains('/') {
            Some("must not contain '/' after the first character")
        } else if name.contains('\0') {
            Some("must not contain NUL")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::InvalidSegmentName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// Derive the name for a session id, e.g. a job id or a launcher's port.
    pub fn for_session(session: impl fmt::Display) -> Result<Self, ConfigError> {
        Self::new(format!("{}{}", SESSION_PREFIX, session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a segment with this name currently exists.
    pub fn exists(&self) -> bool {
        crate::resources::segment::exists(self)
    }

    pub(crate) fn to_cstring(&self) -> CString {
        // Validation rejects interior NUL bytes.
        CString::new(self.0.as_bytes()).unwrap_or_default()
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for a [`SharedMemoryResource`](crate::SharedMemoryResource).
#[derive(Debug, Clone)]
pub struct SharedConfig {
    /// Name of the segment shared by the group.
    pub segment: SegmentName,

    /// This process's rank in the group; rank 0 creates the segment.
    pub rank: u32,

    /// Expected group size including rank 0 (default: unknown).
    ///
    /// When set, rank 0 does not unlink the segment until this many
    /// participants have attached.
    pub participants: Option<u32>,

    /// Sleep between polls while waiting (default: 100 ms)
    pub poll_interval: Duration,

    /// How long a follower waits for rank 0 to publish (default: 30 s)
    pub bootstrap_timeout: Duration,

    /// How long rank 0 waits for followers before unlinking (default: 10 s).
    /// Zero unlinks immediately.
    pub teardown_timeout: Duration,

    /// Permission bits for the created segment (default: 0o666)
    pub mode: u32,

    /// Remove a leftover segment with the same name before creating (default: false)
    pub reclaim_stale: bool,
}

impl SharedConfig {
    /// Create a rank-0 config with defaults.
    pub fn new(segment: SegmentName) -> Self {
        Self {
            segment,
            rank: 0,
            participants: None,
            poll_interval: Duration::from_millis(100),
            bootstrap_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(10),
            mode: 0o666,
            reclaim_stale: false,
        }
    }

    /// Build a config from the process environment.
    ///
    /// - `STAGEALLOC_SEGMENT`: segment name, or
    /// - `STAGEALLOC_SESSION`: session id passed to [`SegmentName::for_session`]
    /// - `LOCAL_RANK`: rank (default 0)
    /// - `LOCAL_WORLD_SIZE`: participant count (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let segment = match (lookup("STAGEALLOC_SEGMENT"), lookup("STAGEALLOC_SESSION")) {
            (Some(name), _) => SegmentName::new(name)?,
            (None, Some(session)) => SegmentName::for_session(session)?,
            (None, None) => return Err(ConfigError::MissingEnv("STAGEALLOC_SEGMENT")),
        };

        let mut config = Self::new(segment);
        if let Some(rank) = parse_var(&lookup, "LOCAL_RANK")? {
            config.rank = rank;
        }
        config.participants = parse_var(&lookup, "LOCAL_WORLD_SIZE")?;
        Ok(config)
    }

    /// Builder pattern: set rank.
    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// Builder pattern: set the expected group size.
    pub fn with_participants(mut self, participants: u32) -> Self {
        self.participants = Some(participants);
        self
    }

    /// Builder pattern: set poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder pattern: set bootstrap timeout.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Builder pattern: set teardown timeout.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Builder pattern: set permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Builder pattern: reclaim stale segments.
    pub fn with_reclaim_stale(mut self, reclaim: bool) -> Self {
        self.reclaim_stale = reclaim;
        self
    }

    /// Whether this rank creates and unlinks the segment.
    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u32>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => {
            let parsed = value.trim().parse::<u32>();
            match parsed {
                Ok(v) => Ok(Some(v)),
                Err(_) => Err(ConfigError::InvalidEnv { var, value }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_segment_name_validation() {
        assert!(SegmentName::new("/shm").is_ok());
        assert!(SegmentName::new("shm").is_err());
        assert!(SegmentName::new("/").is_err());
        assert!(SegmentName::new("/a/b").is_err());
        assert!(SegmentName::new("/a\0b").is_err());
        assert!(SegmentName::new(format!("/{}", "x".repeat(255))).is_err());
    }

    #[test]
    fn test_session_name() {
        let name = SegmentName::for_session(4242).unwrap();
        assert_eq!(name.as_str(), "/stagealloc.4242");
        assert!(SegmentName::for_session("a/b").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = SharedConfig::new(SegmentName::new("/shm").unwrap());
        assert!(config.is_leader());
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.mode, 0o666);
        assert_eq!(config.participants, None);
        assert!(!config.reclaim_stale);
    }

    #[test]
    fn test_builder() {
        let config = SharedConfig::new(SegmentName::new("/shm").unwrap())
            .with_rank(3)
            .with_participants(4)
            .with_bootstrap_timeout(Duration::from_secs(1))
            .with_mode(0o600);
        assert!(!config.is_leader());
        assert_eq!(config.participants, Some(4));
        assert_eq!(config.bootstrap_timeout, Duration::from_secs(1));
        assert_eq!(config.mode, 0o600);
    }

    #[test]
    fn test_from_lookup() {
        let config = SharedConfig::from_lookup(lookup(&[
            ("STAGEALLOC_SESSION", "job9"),
            ("LOCAL_RANK", "2"),
            ("LOCAL_WORLD_SIZE", "8"),
        ]))
        .unwrap();
        assert_eq!(config.segment.as_str(), "/stagealloc.job9");
        assert_eq!(config.rank, 2);
        assert_eq!(config.participants, Some(8));
    }

    #[test]
    fn test_from_lookup_prefers_explicit_name() {
        let config = SharedConfig::from_lookup(lookup(&[
            ("STAGEALLOC_SEGMENT", "/explicit"),
            ("STAGEALLOC_SESSION", "ignored"),
        ]))
        .unwrap();
        assert_eq!(config.segment.as_str(), "/explicit");
        assert_eq!(config.rank, 0);
    }

    #[test]
    fn test_from_lookup_errors() {
        assert_eq!(
            SharedConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingEnv("STAGEALLOC_SEGMENT")
        );
        assert!(matches!(
            SharedConfig::from_lookup(lookup(&[
                ("STAGEALLOC_SEGMENT", "/x"),
                ("LOCAL_RANK", "minus one"),
            ])),
            Err(ConfigError::InvalidEnv { var: "LOCAL_RANK", .. })
        ));
    }
}
