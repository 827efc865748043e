use aho_corasick::{AhoCorasick, AhoCorasickBuilder, AhoCorasickKind};
use thiserror::Error;

use crate::kind::{MetricKind, MetricKindMask};

/// Decides which metrics are reported.
///
/// Implemented for any `Fn(&str, MetricKind) -> bool`, so a closure can be used directly.
pub trait MetricFilter: Send + Sync {
    /// Returns `true` if the metric should be reported.
    fn matches(&self, name: &str, kind: MetricKind) -> bool;
}

impl<F> MetricFilter for F
where
    F: Fn(&str, MetricKind) -> bool + Send + Sync,
{
    fn matches(&self, name: &str, kind: MetricKind) -> bool {
        self(name, kind)
    }
}

/// Accepts every metric.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllMetrics;

impl MetricFilter for AllMetrics {
    fn matches(&self, _name: &str, _kind: MetricKind) -> bool {
        true
    }
}

/// Error returned when a [`PatternFilter`] cannot be built.
#[derive(Debug, Error)]
#[error("failed to build pattern filter: {0}")]
pub struct FilterError(#[from] aho_corasick::BuildError);

/// Includes metrics whose name contains any of a set of patterns.
///
/// Uses an [Aho-Corasick][ahocorasick] automaton to match a metric name against multiple patterns
/// at once.  Patterns are matched as substrings of the name the registry reports, before any
/// prefix is applied.  An empty pattern list matches every name.
///
/// The filter can additionally be narrowed to some kinds of metrics: metrics of other kinds are
/// never reported.
///
/// [ahocorasick]: https://en.wikipedia.org/wiki/Aho–Corasick_algorithm
pub struct PatternFilter {
    automaton: Option<AhoCorasick>,
    kinds: MetricKindMask,
}

impl PatternFilter {
    /// Creates a [`PatternFilterBuilder`] from an existing set of patterns.
    pub fn from_patterns<P, I>(patterns: P) -> PatternFilterBuilder
    where
        P: IntoIterator<Item = I>,
        I: AsRef<str>,
    {
        PatternFilterBuilder {
            patterns: patterns.into_iter().map(|s| s.as_ref().to_string()).collect(),
            kinds: MetricKindMask::ALL,
            case_insensitive: false,
            use_dfa: true,
        }
    }
}

impl MetricFilter for PatternFilter {
    fn matches(&self, name: &str, kind: MetricKind) -> bool {
        if !self.kinds.matches(kind) {
            return false;
        }

        self.automaton.as_ref().map_or(true, |automaton| automaton.is_match(name))
    }
}

/// Builder for [`PatternFilter`].
#[derive(Clone, Debug)]
pub struct PatternFilterBuilder {
    patterns: Vec<String>,
    kinds: MetricKindMask,
    case_insensitive: bool,
    use_dfa: bool,
}

impl PatternFilterBuilder {
    /// Adds a pattern to match.
    #[must_use]
    pub fn add_pattern<P>(mut self, pattern: P) -> Self
    where
        P: AsRef<str>,
    {
        self.patterns.push(pattern.as_ref().to_string());
        self
    }

    /// Restricts the filter to the given kinds of metrics.
    ///
    /// Defaults to [`MetricKindMask::ALL`].
    #[must_use]
    pub fn only_kinds(mut self, kinds: MetricKindMask) -> Self {
        self.kinds = kinds;
        self
    }

    /// Sets whether matching ignores ASCII case.
    ///
    /// Defaults to `false` i.e. searches are case sensitive.
    #[must_use]
    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Sets whether or not to internally use a deterministic finite automaton.
    ///
    /// A DFA searches faster than the default NFA at the cost of more memory and a longer build.
    /// For the short name patterns usually configured here, that trade is worth it.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn use_dfa(mut self, dfa: bool) -> Self {
        self.use_dfa = dfa;
        self
    }

    /// Builds the filter.
    ///
    /// # Errors
    ///
    /// If the automaton exceeds the internal size limits of the matcher, an error is returned.
    pub fn build(self) -> Result<PatternFilter, FilterError> {
        let automaton = if self.patterns.is_empty() {
            None
        } else {
            let automaton = AhoCorasickBuilder::new()
                .ascii_case_insensitive(self.case_insensitive)
                .kind(self.use_dfa.then_some(AhoCorasickKind::DFA))
                .build(&self.patterns)?;
            Some(automaton)
        };

        Ok(PatternFilter { automaton, kinds: self.kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::{AllMetrics, MetricFilter, PatternFilter};
    use crate::kind::{MetricKind, MetricKindMask};

    #[test]
    fn test_all_metrics() {
        assert!(AllMetrics.matches("anything", MetricKind::Gauge));
        assert!(AllMetrics.matches("", MetricKind::Timer));
    }

    #[test]
    fn test_closure_filter() {
        let filter = |name: &str, kind: MetricKind| kind == MetricKind::Counter && name != "skip";
        assert!(filter.matches("requests", MetricKind::Counter));
        assert!(!filter.matches("skip", MetricKind::Counter));
        assert!(!filter.matches("requests", MetricKind::Meter));
    }

    #[test]
    fn test_patterns() {
        let filter = PatternFilter::from_patterns(["hello", "db."]).build().unwrap();

        assert!(filter.matches("/hello#greet", MetricKind::Timer));
        assert!(filter.matches("db.pool.active", MetricKind::Gauge));
        assert!(!filter.matches("jvm.threads", MetricKind::Gauge));
        assert!(!filter.matches("HELLO", MetricKind::Counter));
    }

    #[test]
    fn test_case_insensitivity() {
        let filter = PatternFilter::from_patterns(["hello"])
            .case_insensitive(true)
            .use_dfa(false)
            .build()
            .unwrap();

        assert!(filter.matches("HeLLo.requests", MetricKind::Counter));
        assert!(!filter.matches("goodbye", MetricKind::Counter));
    }

    #[test]
    fn test_kind_restriction() {
        let filter = PatternFilter::from_patterns(Vec::<String>::new())
            .only_kinds(MetricKindMask::TIMER | MetricKindMask::METER)
            .build()
            .unwrap();

        assert!(filter.matches("anything", MetricKind::Timer));
        assert!(filter.matches("anything", MetricKind::Meter));
        assert!(!filter.matches("anything", MetricKind::Counter));

        let filter = PatternFilter::from_patterns(["cache"])
            .add_pattern("queue")
            .only_kinds(MetricKindMask::GAUGE)
            .build()
            .unwrap();

        assert!(filter.matches("queue.depth", MetricKind::Gauge));
        assert!(!filter.matches("queue.depth", MetricKind::Counter));
    }
}
