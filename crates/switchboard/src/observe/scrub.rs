//! Metric name and label hygiene.
//!
//! Metric names obey `[A-Za-z_][0-9A-Za-z_]*`, the intersection of what
//! StatsD-style and Prometheus-style sinks accept. Statically declared
//! names are validated at construction; dynamic label values are
//! scrubbed at emission time to `[A-Za-z0-9_\-.]`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref METRIC_NAME_RE: Regex = Regex::new(r"^[A-Za-z_][0-9A-Za-z_]*$").unwrap();
    static ref LABEL_VALUE_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-.]+$").unwrap();
}

/// Replacement for label values that fail the character class.
pub(crate) const SCRUBBED: &str = "__scrubbed__";

pub(crate) fn is_valid_metric_name(name: &str) -> bool {
    METRIC_NAME_RE.is_match(name)
}

pub(crate) fn scrub_label_value(value: &str) -> &str {
    if value.is_empty() || LABEL_VALUE_RE.is_match(value) {
        value
    } else {
        SCRUBBED
    }
}

/// Service names share the label character class, and must be non-empty.
pub(crate) fn is_valid_service_name(name: &str) -> bool {
    LABEL_VALUE_RE.is_match(name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn metric_names() {
        assert!(is_valid_metric_name("rpc_calls"));
        assert!(is_valid_metric_name("_private"));
        assert!(!is_valid_metric_name("9calls"));
        assert!(!is_valid_metric_name("rpc-calls"));
        assert!(!is_valid_metric_name(""));
    }

    #[test]
    fn label_values() {
        assert_eq!(scrub_label_value("kv-store.v2"), "kv-store.v2");
        assert_eq!(scrub_label_value(""), "");
        assert_eq!(scrub_label_value("has space"), SCRUBBED);
        assert_eq!(scrub_label_value("new\nline"), SCRUBBED);
    }

    #[test]
    fn service_names() {
        assert!(is_valid_service_name("kv.prod-2"));
        assert!(!is_valid_service_name(""));
        assert!(!is_valid_service_name("kv store"));
    }
}
