//! Rate limiting rule set configuration.
//!
//! A rule set is either one global threshold or an ordered list of rule items. Each rule item
//! classifies requests by exactly one dimension and carries the limit keys matched against the
//! extracted value:
//!
//! ```toml
//! [rate_limit]
//! rule_name = "routeA-limit"
//!
//! [[rate_limit.rule_items]]
//! limit_by_per_param = "apikey"
//! limit_keys = [
//!     { key = "regexp:^a.*", query_per_second = 10 },
//!     { key = "*", query_per_minute = 100 },
//! ]
//! ```

use std::{collections::HashSet, fmt, net::IpAddr, time::Duration};

use http::StatusCode;
use ipnet::{IpNet, Ipv4Net};
use regex::Regex;
use serde::Deserialize;

/// Header carrying the authenticated consumer name, set by the authentication layer in front of us.
pub const DEFAULT_CONSUMER_HEADER: &str = "x-mse-consumer";

/// Status code returned to rejected requests unless configured otherwise.
pub const DEFAULT_REJECTED_CODE: StatusCode = StatusCode::TOO_MANY_REQUESTS;

/// Body returned to rejected requests unless configured otherwise.
pub const DEFAULT_REJECTED_MSG: &str = "Too many requests";

const REGEX_PREFIX: &str = "regexp:";
const HEADER_IP_SOURCE_PREFIX: &str = "from-header-";
const REMOTE_ADDR_IP_SOURCE: &str = "from-remote-addr";

/// Fixed counting window of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// One second.
    Second,
    /// Sixty seconds.
    Minute,
    /// One hour.
    Hour,
    /// One day.
    Day,
}

impl TimeWindow {
    /// Length of the window in seconds.
    pub const fn as_secs(self) -> u64 {
        match self {
            TimeWindow::Second => 1,
            TimeWindow::Minute => 60,
            TimeWindow::Hour => 60 * 60,
            TimeWindow::Day => 24 * 60 * 60,
        }
    }

    /// Length of the window.
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// What a threshold counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdUnit {
    /// Requests, configured with `query_per_*`.
    Requests,
    /// LLM tokens, configured with `token_per_*`.
    Tokens,
}

impl fmt::Display for ThresholdUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdUnit::Requests => f.write_str("query_per_*"),
            ThresholdUnit::Tokens => f.write_str("token_per_*"),
        }
    }
}

/// Maximum amount allowed within one time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    /// Allowed amount per window, always positive.
    pub count: u64,
    /// The counting window.
    pub window: TimeWindow,
    /// Whether requests or tokens are counted.
    pub unit: ThresholdUnit,
}

/// Dimension a rule item classifies requests by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitType {
    /// One counter per configured header value.
    Header,
    /// One counter per configured query parameter value.
    Param,
    /// One counter per configured consumer.
    Consumer,
    /// One counter per configured cookie value.
    Cookie,
    /// One counter per distinct header value matching a pattern.
    PerHeader,
    /// One counter per distinct query parameter value matching a pattern.
    PerParam,
    /// One counter per distinct consumer matching a pattern.
    PerConsumer,
    /// One counter per distinct cookie value matching a pattern.
    PerCookie,
    /// One counter per client IP inside a configured network.
    PerIp,
}

impl LimitType {
    /// The configuration field name of this limit type.
    pub const fn as_str(self) -> &'static str {
        match self {
            LimitType::Header => "limit_by_header",
            LimitType::Param => "limit_by_param",
            LimitType::Consumer => "limit_by_consumer",
            LimitType::Cookie => "limit_by_cookie",
            LimitType::PerHeader => "limit_by_per_header",
            LimitType::PerParam => "limit_by_per_param",
            LimitType::PerConsumer => "limit_by_per_consumer",
            LimitType::PerCookie => "limit_by_per_cookie",
            LimitType::PerIp => "limit_by_per_ip",
        }
    }

    /// Per types count every distinct value separately and match keys by pattern.
    pub const fn is_per_value(self) -> bool {
        matches!(
            self,
            LimitType::PerHeader | LimitType::PerParam | LimitType::PerConsumer | LimitType::PerCookie
        )
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the client address of a `limit_by_per_ip` rule comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpSource {
    /// The peer address of the TCP connection.
    RemoteAddr,
    /// The first address of a request header, e.g. `x-forwarded-for`.
    Header(String),
}

/// Match specification of one limit key.
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    /// Value equals the key.
    Exact(String),
    /// Any value, written as `*`.
    Any,
    /// Value matches the pattern, written as `regexp:<pattern>`.
    Regex(Regex),
    /// Client address is inside the network.
    IpNet(IpNet),
}

impl KeyMatcher {
    /// Whether an extracted string value matches.
    pub fn matches_value(&self, value: &str) -> bool {
        match self {
            KeyMatcher::Exact(key) => key == value,
            KeyMatcher::Any => true,
            KeyMatcher::Regex(regex) => regex.is_match(value),
            KeyMatcher::IpNet(_) => false,
        }
    }

    /// Whether a client address matches.
    pub fn matches_ip(&self, ip: IpAddr) -> bool {
        match self {
            KeyMatcher::IpNet(net) => net.contains(&ip.to_canonical()),
            _ => false,
        }
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatcher::Exact(key) => f.write_str(key),
            KeyMatcher::Any => f.write_str("*"),
            KeyMatcher::Regex(regex) => write!(f, "{REGEX_PREFIX}{}", regex.as_str()),
            KeyMatcher::IpNet(net) => write!(f, "{net}"),
        }
    }
}

/// One entry of `limit_keys`.
#[derive(Debug, Clone)]
pub struct LimitKey {
    /// How the extracted value is matched.
    pub matcher: KeyMatcher,
    /// The threshold applied to matching requests.
    pub threshold: Threshold,
}

/// One entry of `rule_items`.
#[derive(Debug, Clone)]
pub struct LimitRuleItem {
    /// The classifying dimension.
    pub limit_type: LimitType,
    /// Header, parameter or cookie name; the consumer header for consumer types; the raw
    /// source specification for `limit_by_per_ip`.
    pub key: String,
    /// Address source, set only for `limit_by_per_ip`.
    pub ip_source: Option<IpSource>,
    /// Limit keys in evaluation order.
    pub limit_keys: Vec<LimitKey>,
}

/// Either a single global threshold or ordered rule items.
#[derive(Debug, Clone)]
pub enum RuleSetLimit {
    /// Every request shares one counter.
    Global(Threshold),
    /// First matching rule item wins.
    Rules(Vec<LimitRuleItem>),
}

/// A complete rate limiting rule set.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRuleSet")]
pub struct RuleSetConfig {
    /// Name of the rule set, part of every counter key.
    pub rule_name: String,
    /// The thresholds.
    pub limit: RuleSetLimit,
    /// Header identifying the consumer for `limit_by_consumer` and `limit_by_per_consumer`.
    pub consumer_header: String,
    /// Whether admitted responses carry the quota headers.
    pub show_limit_quota_header: bool,
    /// Status code of rejected requests.
    pub rejected_code: StatusCode,
    /// Body of rejected requests.
    pub rejected_msg: String,
    /// Whether requests pass when the counter storage fails.
    pub fail_open: bool,
}

impl RuleSetConfig {
    /// All thresholds of the rule set.
    pub fn thresholds(&self) -> Vec<&Threshold> {
        match &self.limit {
            RuleSetLimit::Global(threshold) => vec![threshold],
            RuleSetLimit::Rules(items) => items
                .iter()
                .flat_map(|item| item.limit_keys.iter().map(|key| &key.threshold))
                .collect(),
        }
    }

    /// Warnings for rule items repeating an earlier `(limit_type, key)` pair. Such items read the
    /// same value, so a value matching the limit keys of both is only counted by the first.
    pub fn duplicate_rules(&self) -> Vec<String> {
        let RuleSetLimit::Rules(items) = &self.limit else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut warnings = Vec::new();

        for item in items {
            if !seen.insert((item.limit_type, item.key.as_str())) {
                warnings.push(format!(
                    "duplicate rule found: {}='{}' in rule_items of '{}'",
                    item.limit_type, item.key, self.rule_name
                ));
            }
        }

        warnings
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleSet {
    rule_name: Option<String>,
    global_threshold: Option<RawThreshold>,
    rule_items: Option<Vec<RawRuleItem>>,
    #[serde(default = "default_consumer_header")]
    consumer_header: String,
    #[serde(default)]
    show_limit_quota_header: bool,
    rejected_code: Option<u16>,
    rejected_msg: Option<String>,
    #[serde(default = "default_fail_open")]
    fail_open: bool,
}

fn default_consumer_header() -> String {
    DEFAULT_CONSUMER_HEADER.to_string()
}

fn default_fail_open() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleItem {
    limit_by_header: Option<String>,
    limit_by_param: Option<String>,
    limit_by_consumer: Option<String>,
    limit_by_cookie: Option<String>,
    limit_by_per_header: Option<String>,
    limit_by_per_param: Option<String>,
    limit_by_per_consumer: Option<String>,
    limit_by_per_cookie: Option<String>,
    limit_by_per_ip: Option<String>,
    limit_keys: Option<Vec<RawThreshold>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThreshold {
    key: Option<String>,
    query_per_second: Option<i64>,
    query_per_minute: Option<i64>,
    query_per_hour: Option<i64>,
    query_per_day: Option<i64>,
    token_per_second: Option<i64>,
    token_per_minute: Option<i64>,
    token_per_hour: Option<i64>,
    token_per_day: Option<i64>,
}

impl RawThreshold {
    fn threshold(&self) -> Result<Threshold, String> {
        use ThresholdUnit::*;
        use TimeWindow::*;

        let candidates = [
            ("query_per_second", self.query_per_second, Second, Requests),
            ("query_per_minute", self.query_per_minute, Minute, Requests),
            ("query_per_hour", self.query_per_hour, Hour, Requests),
            ("query_per_day", self.query_per_day, Day, Requests),
            ("token_per_second", self.token_per_second, Second, Tokens),
            ("token_per_minute", self.token_per_minute, Minute, Tokens),
            ("token_per_hour", self.token_per_hour, Hour, Tokens),
            ("token_per_day", self.token_per_day, Day, Tokens),
        ];

        let mut set = candidates
            .into_iter()
            .filter_map(|(name, count, window, unit)| count.map(|count| (name, count, window, unit)));

        let Some((name, count, window, unit)) = set.next() else {
            return Err("one of 'query_per_second', 'query_per_minute', 'query_per_hour', 'query_per_day' \
                 or their 'token_per_*' counterparts must be set"
                .to_string());
        };

        if let Some((other, ..)) = set.next() {
            return Err(format!("only one threshold can be set, found both '{name}' and '{other}'"));
        }

        if count <= 0 {
            return Err(format!("'{name}' must be a positive integer, got {count}"));
        }

        Ok(Threshold {
            count: count as u64,
            window,
            unit,
        })
    }
}

impl TryFrom<RawRuleSet> for RuleSetConfig {
    type Error = String;

    fn try_from(raw: RawRuleSet) -> Result<Self, Self::Error> {
        let rule_name = match raw.rule_name {
            Some(name) if !name.is_empty() => name,
            Some(_) => return Err("rule_name must not be empty".to_string()),
            None => return Err("missing rule_name in config".to_string()),
        };

        let limit = match (raw.global_threshold, raw.rule_items) {
            (None, None) => return Err("at least one of 'global_threshold' or 'rule_items' must be set".to_string()),
            (Some(_), Some(_)) => {
                return Err("'global_threshold' and 'rule_items' cannot be set at the same time".to_string());
            }
            (Some(global), None) => {
                if global.key.is_some() {
                    return Err("global_threshold does not take a key".to_string());
                }

                let threshold = global
                    .threshold()
                    .map_err(|e| format!("failed to parse global_threshold: {e}"))?;

                RuleSetLimit::Global(threshold)
            }
            (None, Some(items)) => {
                if items.is_empty() {
                    return Err("config rule_items cannot be empty".to_string());
                }

                let items = items
                    .into_iter()
                    .map(|item| parse_rule_item(item, &raw.consumer_header))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| format!("failed to parse rule_item in rule_items: {e}"))?;

                RuleSetLimit::Rules(items)
            }
        };

        let rejected_code = match raw.rejected_code {
            Some(code) => StatusCode::from_u16(code).map_err(|_| format!("invalid rejected_code {code}"))?,
            None => DEFAULT_REJECTED_CODE,
        };

        Ok(RuleSetConfig {
            rule_name,
            limit,
            consumer_header: raw.consumer_header,
            show_limit_quota_header: raw.show_limit_quota_header,
            rejected_code,
            rejected_msg: raw.rejected_msg.unwrap_or_else(|| DEFAULT_REJECTED_MSG.to_string()),
            fail_open: raw.fail_open,
        })
    }
}

fn parse_rule_item(raw: RawRuleItem, consumer_header: &str) -> Result<LimitRuleItem, String> {
    let candidates = [
        (LimitType::Header, raw.limit_by_header),
        (LimitType::Param, raw.limit_by_param),
        (LimitType::Consumer, raw.limit_by_consumer),
        (LimitType::Cookie, raw.limit_by_cookie),
        (LimitType::PerHeader, raw.limit_by_per_header),
        (LimitType::PerParam, raw.limit_by_per_param),
        (LimitType::PerConsumer, raw.limit_by_per_consumer),
        (LimitType::PerCookie, raw.limit_by_per_cookie),
        (LimitType::PerIp, raw.limit_by_per_ip),
    ];

    let mut set = candidates
        .into_iter()
        .filter_map(|(limit_type, value)| value.map(|value| (limit_type, value)));

    let Some((limit_type, value)) = set.next() else {
        return Err("one of 'limit_by_header', 'limit_by_param', 'limit_by_consumer', 'limit_by_cookie', \
             'limit_by_per_header', 'limit_by_per_param', 'limit_by_per_consumer', 'limit_by_per_cookie' \
             or 'limit_by_per_ip' must be set"
            .to_string());
    };

    if let Some((other, _)) = set.next() {
        return Err(format!(
            "only one limit type can be set per rule item, found both '{limit_type}' and '{other}'"
        ));
    }

    let (key, ip_source) = match limit_type {
        LimitType::Consumer | LimitType::PerConsumer => (consumer_header.to_string(), None),
        LimitType::PerIp => {
            let source = parse_ip_source(&value)?;
            (value, Some(source))
        }
        _ if value.is_empty() => return Err(format!("'{limit_type}' must not be empty")),
        _ => (value, None),
    };

    let Some(raw_keys) = raw.limit_keys else {
        return Err("missing limit_keys in config".to_string());
    };

    if raw_keys.is_empty() {
        return Err("config limit_keys cannot be empty".to_string());
    }

    let limit_keys = raw_keys
        .into_iter()
        .map(|raw_key| parse_limit_key(limit_type, raw_key))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("failed to init config items: {e}"))?;

    Ok(LimitRuleItem {
        limit_type,
        key,
        ip_source,
        limit_keys,
    })
}

fn parse_ip_source(value: &str) -> Result<IpSource, String> {
    if let Some(header) = value.strip_prefix(HEADER_IP_SOURCE_PREFIX) {
        if header.is_empty() {
            return Err("limit_by_per_ip parse error: empty after 'from-header-'".to_string());
        }

        return Ok(IpSource::Header(header.to_ascii_lowercase()));
    }

    if value == REMOTE_ADDR_IP_SOURCE {
        return Ok(IpSource::RemoteAddr);
    }

    Err("the 'limit_by_per_ip' restriction must start with 'from-header-' or be exactly 'from-remote-addr'".to_string())
}

fn parse_limit_key(limit_type: LimitType, raw: RawThreshold) -> Result<LimitKey, String> {
    let key = match raw.key.as_deref() {
        Some(key) if !key.is_empty() => key,
        _ => return Err("limit_keys key is required".to_string()),
    };

    let matcher = if limit_type == LimitType::PerIp {
        let net = parse_ip_net(key).map_err(|e| format!("failed to parse IPNet for key '{key}': {e}"))?;
        KeyMatcher::IpNet(net)
    } else if limit_type.is_per_value() {
        if key == "*" {
            KeyMatcher::Any
        } else if let Some(pattern) = key.strip_prefix(REGEX_PREFIX) {
            let regex = Regex::new(pattern).map_err(|e| format!("failed to compile regex for key '{key}': {e}"))?;
            KeyMatcher::Regex(regex)
        } else {
            return Err(format!(
                "the '{limit_type}' restriction must start with 'regexp:' or be exactly '*'"
            ));
        }
    } else {
        KeyMatcher::Exact(key.to_string())
    };

    let threshold = raw.threshold().map_err(|e| format!("{e} for key: {key}"))?;

    Ok(LimitKey { matcher, threshold })
}

/// Parses a single address as a host network, or a CIDR block.
///
/// Client addresses are matched in canonical form, so IPv4-mapped IPv6 networks are turned into
/// their IPv4 equivalent.
fn parse_ip_net(key: &str) -> Result<IpNet, String> {
    let net = match key.parse::<IpNet>() {
        Ok(net) => net.trunc(),
        Err(_) => key
            .parse::<IpAddr>()
            .map(IpNet::from)
            .map_err(|_| format!("invalid address or CIDR '{key}'"))?,
    };

    let IpNet::V6(v6) = net else {
        return Ok(net);
    };

    let Some(v4) = v6.network().to_ipv4_mapped() else {
        return Ok(net);
    };

    // a truncated network keeps the ::ffff prefix only with a length of 96 or more
    Ipv4Net::new(v4, v6.prefix_len() - 96)
        .map(IpNet::V4)
        .map_err(|e| format!("invalid IPv4-mapped network '{key}': {e}"))
}
