//! First-match evaluation of a rule set against a request.

use config::{LimitKey, LimitRuleItem, LimitType, RuleSetConfig, RuleSetLimit, Threshold};

use crate::{extract, request::RateLimitRequest};

const GLOBAL_DIMENSION: &str = "global_threshold";

/// The limit key a request is counted against.
#[derive(Debug)]
pub(crate) struct Matched<'a> {
    /// `global_threshold`, or `{limit_type}:{key}` of the matching rule item.
    pub dimension: String,
    /// The counted value. Every distinct value has its own counter.
    pub value: String,
    pub threshold: &'a Threshold,
}

/// Finds the limit key the request is counted against. Rule items are tried in order and the
/// first one with a matching limit key wins.
pub(crate) fn find_match<'a>(rule_set: &'a RuleSetConfig, request: &RateLimitRequest) -> Option<Matched<'a>> {
    match &rule_set.limit {
        RuleSetLimit::Global(threshold) => Some(Matched {
            dimension: GLOBAL_DIMENSION.to_string(),
            value: "*".to_string(),
            threshold,
        }),
        RuleSetLimit::Rules(items) => items.iter().find_map(|item| match_item(item, request)),
    }
}

fn match_item<'a>(item: &'a LimitRuleItem, request: &RateLimitRequest) -> Option<Matched<'a>> {
    let (value, limit_key) = match item.limit_type {
        LimitType::Header | LimitType::PerHeader | LimitType::Consumer | LimitType::PerConsumer => {
            let Some(value) = extract::header(&request.headers, &item.key) else {
                log::debug!("request header {} is missing, skipping {}", item.key, item.limit_type);
                return None;
            };

            (value.to_string(), find_by_value(&item.limit_keys, value)?)
        }
        LimitType::Param | LimitType::PerParam => {
            let Some(value) = extract::param(request.query.as_deref(), &item.key) else {
                log::debug!("request param {} is missing, skipping {}", item.key, item.limit_type);
                return None;
            };

            let limit_key = find_by_value(&item.limit_keys, &value)?;
            (value, limit_key)
        }
        LimitType::Cookie | LimitType::PerCookie => {
            let Some(value) = extract::cookie(&request.headers, &item.key) else {
                log::debug!("cookie {} is missing or empty, skipping {}", item.key, item.limit_type);
                return None;
            };

            (value.to_string(), find_by_value(&item.limit_keys, value)?)
        }
        LimitType::PerIp => {
            let source = item.ip_source.as_ref()?;

            let Some(ip) = extract::client_ip(&request.headers, source, request.remote_addr) else {
                log::warn!("failed to get client address for {}='{}'", item.limit_type, item.key);
                return None;
            };

            let ip = ip.to_canonical();
            let limit_key = item.limit_keys.iter().find(|key| key.matcher.matches_ip(ip))?;

            (ip.to_string(), limit_key)
        }
    };

    Some(Matched {
        dimension: format!("{}:{}", item.limit_type, item.key),
        value,
        threshold: &limit_key.threshold,
    })
}

fn find_by_value<'a>(limit_keys: &'a [LimitKey], value: &str) -> Option<&'a LimitKey> {
    limit_keys.iter().find(|key| key.matcher.matches_value(value))
}
