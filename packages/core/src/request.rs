//! Per-call request configuration.
//!
//! [`compose`] merges the pagination flags, the freeform `--query` overlay
//! and (when a profile is active) one usage-ledger tick into a single
//! [`RequestConfiguration`]. Composition is all-or-nothing: a bad overlay
//! fails before the ledger is touched, and a ledger that cannot be saved
//! fails the whole call.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::ledger::{Subscription, UsageLedger};

/// Rows per page when `--page-size` is not given.
pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(1000) {
    Some(size) => size,
    None => panic!("default page size must be non-zero"),
};

const OFFSET_KEY: &str = "offset";
const LIMIT_KEY: &str = "limit";

/// Pagination values exactly as the caller supplied them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub page: Option<NonZeroU32>,
    pub page_size: Option<NonZeroU32>,
}

/// Ordered multi-map of query parameters parsed from `key=value&key=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOverlay {
    pairs: Vec<(String, String)>,
}

impl QueryOverlay {
    /// Parse a URL query string.
    ///
    /// Rejects control characters, `;` separators and malformed
    /// percent-escapes, reporting the byte offset of the first bad byte.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let mut pairs = Vec::new();
        let mut offset = 0;

        for segment in raw.split('&') {
            validate_segment(segment, offset)?;
            offset += segment.len() + 1;

            if segment.is_empty() {
                continue;
            }
            if let Some((key, value)) = url::form_urlencoded::parse(segment.as_bytes()).next() {
                pairs.push((key.into_owned(), value.into_owned()));
            }
        }

        Ok(Self { pairs })
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn validate_segment(segment: &str, base: usize) -> Result<(), CoreError> {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_control() => {
                return Err(CoreError::invalid_query(
                    base + i,
                    format!("unescaped control character 0x{:02x}", b),
                ));
            }
            b';' => {
                return Err(CoreError::invalid_query(
                    base + i,
                    "';' is not a valid separator, use '&'",
                ));
            }
            b'%' => {
                let escape = bytes.get(i + 1..i + 3);
                if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                    return Err(CoreError::invalid_query(base + i, "invalid percent-escape"));
                }
                i += 2;
            }
            _ => {}
        }
        i += 1;
    }
    Ok(())
}

/// Everything the transport needs to shape one outgoing call.
///
/// Built fresh for every call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfiguration {
    current_page: NonZeroU32,
    page_size: NonZeroU32,
    page_explicit: bool,
    page_size_explicit: bool,
    query_overlay: QueryOverlay,
    usage_stamp: Option<u64>,
}

impl Default for RequestConfiguration {
    fn default() -> Self {
        Self {
            current_page: NonZeroU32::MIN,
            page_size: DEFAULT_PAGE_SIZE,
            page_explicit: false,
            page_size_explicit: false,
            query_overlay: QueryOverlay::default(),
            usage_stamp: None,
        }
    }
}

impl RequestConfiguration {
    pub fn current_page(&self) -> u32 {
        self.current_page.get()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn query_overlay(&self) -> &QueryOverlay {
        &self.query_overlay
    }

    /// Requests issued today so far, when a profile ledger is active.
    pub fn usage_stamp(&self) -> Option<u64> {
        self.usage_stamp
    }

    /// Effective query parameters: pagination first, then the overlay.
    ///
    /// Overlay `offset`/`limit` replace the pagination-derived values unless
    /// the matching pagination flag was given explicitly.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let locked = |key: &str| {
            (key == OFFSET_KEY && self.page_explicit)
                || (key == LIMIT_KEY && self.page_size_explicit)
        };

        let offset = u64::from(self.current_page.get() - 1) * u64::from(self.page_size.get());
        let mut pairs: Vec<(String, String)> = [
            (OFFSET_KEY, offset.to_string()),
            (LIMIT_KEY, self.page_size.get().to_string()),
        ]
        .into_iter()
        .filter(|(key, _)| locked(key) || !self.query_overlay.contains_key(key))
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        for (key, value) in self.query_overlay.iter() {
            if locked(key) {
                tracing::warn!(
                    "Ignoring query parameter '{}={}': pagination flag takes precedence",
                    key,
                    value
                );
                continue;
            }
            pairs.push((key.to_string(), value.to_string()));
        }

        pairs
    }
}

/// A credential-bound ledger in use for this invocation.
#[derive(Debug)]
pub struct ActiveLedger {
    ledger: UsageLedger,
    path: PathBuf,
    record: Subscription,
}

impl ActiveLedger {
    /// Load the ledger at `path`, rolling it over to today.
    pub fn open(ledger: UsageLedger, path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let record = ledger.load(&path)?;
        Ok(Self {
            ledger,
            path,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &Subscription {
        &self.record
    }

    pub fn token(&self) -> &str {
        &self.record.credential_token
    }

    /// Count one request and persist it. The in-memory record only changes
    /// once the file has been written.
    fn tick(&mut self) -> Result<u64, CoreError> {
        let mut updated = self.ledger.record_request(self.record.clone());
        self.ledger.save(&mut updated, &self.path)?;
        self.record = updated;
        Ok(self.record.requests_today)
    }
}

/// Build the configuration for one outgoing call.
pub fn compose(
    pagination: &Pagination,
    freeform_query: Option<&str>,
    ledger: Option<&mut ActiveLedger>,
) -> Result<RequestConfiguration, CoreError> {
    let query_overlay = match freeform_query {
        Some(raw) => QueryOverlay::parse(raw)?,
        None => QueryOverlay::default(),
    };

    let usage_stamp = match ledger {
        Some(active) => Some(active.tick()?),
        None => None,
    };

    let config = RequestConfiguration {
        current_page: pagination.page.unwrap_or(NonZeroU32::MIN),
        page_size: pagination.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        page_explicit: pagination.page.is_some(),
        page_size_explicit: pagination.page_size.is_some(),
        query_overlay,
        usage_stamp,
    };

    tracing::debug!(
        "Composed request: page {} size {} overlay {} usage {:?}",
        config.current_page,
        config.page_size,
        config.query_overlay.len(),
        config.usage_stamp
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FixedClock, LEDGER_FILE_NAME};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn pairs(config: &RequestConfiguration) -> Vec<(String, String)> {
        config.query_pairs()
    }

    fn pair(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    // ---- overlay parsing ----

    #[test]
    fn overlay_keeps_order_and_repeated_keys() {
        let overlay = QueryOverlay::parse("select=a&order=b.desc&select=c").unwrap();

        assert_eq!(overlay.len(), 3);
        assert_eq!(overlay.get("select"), Some("a"));
        assert_eq!(overlay.get_all("select").collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn overlay_decodes_escapes_and_plus() {
        let overlay = QueryOverlay::parse("name=hello+world&sym=%24ADA&flag").unwrap();

        assert_eq!(overlay.get("name"), Some("hello world"));
        assert_eq!(overlay.get("sym"), Some("$ADA"));
        assert_eq!(overlay.get("flag"), Some(""));
    }

    #[test]
    fn overlay_skips_empty_segments() {
        let overlay = QueryOverlay::parse("&a=1&&b=2&").unwrap();
        assert_eq!(overlay.len(), 2);
    }

    #[test]
    fn overlay_rejects_bad_escape_with_position() {
        let err = QueryOverlay::parse("a=1&b=%zz").unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuerySyntax { position: 6, .. }));

        let truncated = QueryOverlay::parse("a=%4").unwrap_err();
        assert!(matches!(truncated, CoreError::InvalidQuerySyntax { position: 2, .. }));
    }

    #[test]
    fn overlay_rejects_control_characters_and_semicolons() {
        assert!(matches!(
            QueryOverlay::parse("a=1\n"),
            Err(CoreError::InvalidQuerySyntax { position: 3, .. })
        ));
        assert!(matches!(
            QueryOverlay::parse("a=1;b=2"),
            Err(CoreError::InvalidQuerySyntax { position: 3, .. })
        ));
    }

    // ---- compose ----

    #[test]
    fn defaults_without_query_or_ledger() {
        let config = compose(&Pagination::default(), None, None).unwrap();

        assert_eq!(config.current_page(), 1);
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE.get());
        assert!(config.query_overlay().is_empty());
        assert_eq!(config.usage_stamp(), None);
        assert_eq!(pairs(&config), vec![pair("offset", "0"), pair("limit", "1000")]);
    }

    #[test]
    fn overlay_contains_exactly_the_supplied_pairs() {
        let config = compose(&Pagination::default(), Some("limit=5&order=desc"), None).unwrap();

        let overlay: Vec<_> = config.query_overlay().iter().collect();
        assert_eq!(overlay, vec![("limit", "5"), ("order", "desc")]);
    }

    #[test]
    fn explicit_pagination_sets_offset() {
        let pagination = Pagination {
            page: Some(nz(3)),
            page_size: Some(nz(25)),
        };
        let config = compose(&pagination, None, None).unwrap();

        assert_eq!(pairs(&config), vec![pair("offset", "50"), pair("limit", "25")]);
    }

    #[test]
    fn overlay_overrides_default_pagination_keys() {
        let config = compose(&Pagination::default(), Some("limit=5&order=desc"), None).unwrap();

        assert_eq!(
            pairs(&config),
            vec![pair("offset", "0"), pair("limit", "5"), pair("order", "desc")]
        );
    }

    #[test]
    fn explicit_pagination_wins_over_overlay() {
        let pagination = Pagination {
            page: Some(nz(2)),
            page_size: Some(nz(10)),
        };
        let config = compose(&pagination, Some("limit=5&offset=99&order=desc"), None).unwrap();

        assert_eq!(
            pairs(&config),
            vec![pair("offset", "10"), pair("limit", "10"), pair("order", "desc")]
        );
    }

    #[test]
    fn ledger_tick_stamps_usage_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let ledger = UsageLedger::with_clock(FixedClock(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        ledger.save(&mut Subscription::new("tok"), &path).unwrap();

        let mut active = ActiveLedger::open(ledger.clone(), &path).unwrap();
        let first = compose(&Pagination::default(), None, Some(&mut active)).unwrap();
        let second = compose(&Pagination::default(), None, Some(&mut active)).unwrap();

        assert_eq!(first.usage_stamp(), Some(1));
        assert_eq!(second.usage_stamp(), Some(2));
        assert_eq!(ledger.load(&path).unwrap().requests_today, 2);
    }

    #[test]
    fn invalid_query_leaves_ledger_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let ledger = UsageLedger::with_clock(FixedClock(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        ledger.save(&mut Subscription::new("tok"), &path).unwrap();
        let before = std::fs::read(&path).unwrap();

        let mut active = ActiveLedger::open(ledger, &path).unwrap();
        let result = compose(&Pagination::default(), Some("a=\u{7}"), Some(&mut active));

        assert!(matches!(result, Err(CoreError::InvalidQuerySyntax { .. })));
        assert_eq!(active.record().requests_today, 0);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn persist_failure_fails_composition_and_keeps_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let ledger = UsageLedger::with_clock(FixedClock(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        ledger.save(&mut Subscription::new("tok"), &path).unwrap();

        let mut active = ActiveLedger::open(ledger, &path).unwrap();
        active.path = dir.path().join("gone").join(LEDGER_FILE_NAME);

        let result = compose(&Pagination::default(), None, Some(&mut active));

        assert!(matches!(result, Err(CoreError::UsageLedgerPersistFailure { .. })));
        assert_eq!(active.record().requests_today, 0);
    }
}
