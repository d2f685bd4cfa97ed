//! Building metrics in the Prometheus text format.

use std::fmt;
use std::fmt::Write;
use crate::constants::METRICS_PREFIX;


//------------ Target --------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct Target {
    buf: String,
}

impl Target {
    pub fn into_string(self) -> String {
        self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.into()
    }

    pub fn single(&mut self, metric: Metric, value: impl fmt::Display) {
        metric.header(self);
        metric.single(self, value);
    }

    pub fn header(&mut self, metric: Metric) {
        metric.header(self)
    }

    pub fn multi(&mut self, metric: Metric) -> LabelValue {
        metric.multi(self)
    }
}


//------------ Metric --------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct Metric {
    name: &'static str,
    help: &'static str,
    mtype: MetricType,
}

impl Metric {
    pub fn new(
        name: &'static str, help: &'static str, mtype: MetricType
    ) -> Self {
        Metric { name, help, mtype }
    }

    pub fn counter(name: &'static str, help: &'static str) -> Self {
        Self::new(name, help, MetricType::Counter)
    }

    pub fn gauge(name: &'static str, help: &'static str) -> Self {
        Self::new(name, help, MetricType::Gauge)
    }

    pub fn summary(name: &'static str, help: &'static str) -> Self {
        Self::new(name, help, MetricType::Summary)
    }

    /// Returns a metric for the same family with a suffix to its name.
    ///
    /// Summaries are written as several series, such as `_sum` and
    /// `_count`, that share the header of the family.
    pub fn series(self, suffix: &'static str) -> Series {
        Series { metric: self, suffix }
    }

    fn header(self, target: &mut Target) {
        writeln!(&mut target.buf,
            "# HELP {}_{} {}\n\
             # TYPE {}_{} {}",
            METRICS_PREFIX, self.name, self.help,
            METRICS_PREFIX, self.name, self.mtype,
        ).expect("writing to string");
    }

    fn single(self, target: &mut Target, value: impl fmt::Display) {
        writeln!(&mut target.buf,
            "{}_{} {}",
            METRICS_PREFIX, self.name, value
        ).expect("writing to string");
    }

    fn multi(self, target: &mut Target) -> LabelValue {
        LabelValue::new(self.name, "", target)
    }
}


//------------ Series --------------------------------------------------------

/// One series of a metric family with a name suffix.
#[derive(Clone, Copy, Debug)]
pub struct Series {
    metric: Metric,
    suffix: &'static str,
}

impl Series {
    pub fn multi(self, target: &mut Target) -> LabelValue {
        LabelValue::new(self.metric.name, self.suffix, target)
    }
}


//------------ LabelValue ----------------------------------------------------

pub struct LabelValue<'a> {
    target: &'a mut Target,
    first: bool,
}

impl<'a> LabelValue<'a> {
    fn new(
        name: &'static str, suffix: &'static str, target: &'a mut Target
    ) -> Self {
        write!(
            &mut target.buf, "{}_{}{}{{", METRICS_PREFIX, name, suffix
        ).expect("writing to string");
        LabelValue { target, first: true }
    }

    pub fn label(mut self, name: &str, value: impl fmt::Display) -> Self {
        if self.first {
            self.first = false;
        }
        else {
            self.target.buf.push_str(", ");
        }
        write!(
            &mut self.target.buf, "{}=\"{}\"", name, value
        ).expect("writing to string");
        self
    }

    pub fn value(self, value: impl fmt::Display) {
        writeln!(
            &mut self.target.buf, "}} {}", value
        ).expect("writing to string");
    }
}


//------------ MetricType ----------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub enum MetricType {
    Counter,
    Gauge,
    Summary,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(
            match *self {
                MetricType::Counter => "counter",
                MetricType::Gauge => "gauge",
                MetricType::Summary => "summary",
            }
        )
    }
}


//------------ Tests ---------------------------------------------------------
