//! Metric samples produced by scrapers.

/// Static description of a metric family: name, help text and label names.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    /// Label names in the order sample values must be supplied.
    pub labels: &'static [&'static str],
}

/// The kind of a metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Gauge,
    Counter,
}

/// A single collected sample: a descriptor, a value and one label value per
/// declared label name.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub desc: &'static MetricDesc,
    pub kind: SampleKind,
    pub value: f64,
    pub label_values: Vec<String>,
}

impl MetricSample {
    /// Create a gauge sample. Label values must match the descriptor's label
    /// names in count and order.
    pub fn gauge(desc: &'static MetricDesc, value: f64, label_values: Vec<String>) -> Self {
        Self::new(desc, SampleKind::Gauge, value, label_values)
    }

    /// Create a counter sample. Label values must match the descriptor's
    /// label names in count and order.
    pub fn counter(desc: &'static MetricDesc, value: f64, label_values: Vec<String>) -> Self {
        Self::new(desc, SampleKind::Counter, value, label_values)
    }

    fn new(
        desc: &'static MetricDesc,
        kind: SampleKind,
        value: f64,
        label_values: Vec<String>,
    ) -> Self {
        debug_assert_eq!(
            desc.labels.len(),
            label_values.len(),
            "metric {} declares {} labels but {} values were supplied",
            desc.name,
            desc.labels.len(),
            label_values.len()
        );

        Self {
            desc,
            kind,
            value,
            label_values,
        }
    }
}
