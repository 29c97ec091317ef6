/// Metric kind carried by an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Counter,
    Gauge,
    Timer,
    Set,
}

impl Kind {
    /// Returns the kind name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timer => "timer",
            Self::Set => "set",
        }
    }
}

/// How a gauge observation applies to the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeSign {
    /// Replace the stored value.
    Absolute,
    /// Add to the stored value, saturating at `f64::MAX`.
    Add,
    /// Subtract from the stored value, clamping at zero.
    Subtract,
}

/// Typed value of a single observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Counter(f64),
    Gauge(GaugeSign, f64),
    Timer(f64),
    Set(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Counter(_) => Kind::Counter,
            Self::Gauge(..) => Kind::Gauge,
            Self::Timer(_) => Kind::Timer,
            Self::Set(_) => Kind::Set,
        }
    }
}

/// One parsed metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Full sanitized bucket name, prefix and postfix already applied.
    pub bucket: String,
    pub value: Value,
    /// Declared sampling rate in (0, 1]; 1.0 unless the line carried `|@`.
    pub sampling: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::Counter(1.0).kind(), Kind::Counter);
        assert_eq!(Value::Gauge(GaugeSign::Absolute, 1.0).kind(), Kind::Gauge);
        assert_eq!(Value::Timer(1.0).kind(), Kind::Timer);
        assert_eq!(Value::Set("x".into()).kind(), Kind::Set);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Kind::Counter.as_str(), "counter");
        assert_eq!(Kind::Set.as_str(), "set");
    }
}
