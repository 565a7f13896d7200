//! Distribution summaries used for schema inference and `describe`.
//!
//! Every encoded column carries a [`Summary`]: the row count plus either a
//! quantile sketch (continuous) or a level frequency table (categorical).
//! Summaries are rebuilt whenever the underlying rows change (slicing,
//! appending) and rendered as small text tables for humans.

use indexmap::IndexMap;
use itertools::Itertools;

use crate::raw::Value;

/// Row count plus the per-role distribution of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub nrows: usize,
    pub distr: Distribution,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Cts(CtsSummary),
    Cat(CatSummary),
}

impl Summary {
    pub fn cts(values: &[f64]) -> Self {
        Self {
            nrows: values.len(),
            distr: Distribution::Cts(CtsSummary::from_values(values)),
        }
    }

    pub fn cat(codes: &[i32], levels: &IndexMap<Value, i32>) -> Self {
        Self {
            nrows: codes.len(),
            distr: Distribution::Cat(CatSummary::from_codes(codes, levels)),
        }
    }

    /// A summary for a one-hot block: row count from the block shape,
    /// distribution carried over from the parent categorical column.
    pub fn one_hot(nrows: usize, parent: &Summary) -> Self {
        Self { nrows, distr: parent.distr.clone() }
    }
}

/// Quantile sketch of a continuous column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CtsSummary {
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl CtsSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let sorted = values
            .iter()
            .copied()
            .sorted_by(f64::total_cmp)
            .collect_vec();
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std = if n < 2 {
            0.0
        } else {
            (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        };
        Self {
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[n - 1],
            mean,
            std,
        }
    }
}

impl approx::AbsDiffEq for CtsSummary {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.min, &other.min, epsilon)
            && f64::abs_diff_eq(&self.q25, &other.q25, epsilon)
            && f64::abs_diff_eq(&self.median, &other.median, epsilon)
            && f64::abs_diff_eq(&self.q75, &other.q75, epsilon)
            && f64::abs_diff_eq(&self.max, &other.max, epsilon)
            && f64::abs_diff_eq(&self.mean, &other.mean, epsilon)
            && f64::abs_diff_eq(&self.std, &other.std, epsilon)
    }
}

/// Level frequency table of a categorical column, in level-code order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatSummary {
    pub counts: IndexMap<Value, usize>,
}

impl CatSummary {
    pub fn from_codes(codes: &[i32], levels: &IndexMap<Value, i32>) -> Self {
        let mut counts: IndexMap<Value, usize> =
            levels.keys().map(|v| (v.clone(), 0)).collect();
        for &code in codes {
            if let Some((value, _)) = levels.iter().find(|(_, &c)| c == code) {
                *counts.get_mut(value).unwrap() += 1;
            }
        }
        Self { counts }
    }

    /// The `k` most frequent levels, most frequent first. Ties keep
    /// level-code order.
    pub fn top_k(&self, k: usize) -> Vec<(&Value, usize)> {
        self.counts
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1))
            .take(k)
            .map(|(v, &n)| (v, n))
            .collect()
    }
}

/// Render a continuous summary as a two-column table.
pub fn render_cts(name: &str, nrows: usize, s: &CtsSummary) -> String {
    let mut builder = tabled::builder::Builder::new();
    builder.push_record([name.to_string(), String::new()]);
    let stats = [
        ("rows", nrows as f64),
        ("min", s.min),
        ("q25", s.q25),
        ("median", s.median),
        ("q75", s.q75),
        ("max", s.max),
        ("mean", s.mean),
        ("std", s.std),
    ];
    for (label, value) in stats {
        builder.push_record([label.to_string(), format!("{value:.4}")]);
    }
    finish_table(builder)
}

/// Render the top-`k` level frequencies as a three-column table.
pub fn render_cat(name: &str, nrows: usize, s: &CatSummary, k: usize) -> String {
    let mut builder = tabled::builder::Builder::new();
    builder.push_record([name.to_string(), "count".to_string(), "share".to_string()]);
    for (value, count) in s.top_k(k) {
        let share = if nrows == 0 { 0.0 } else { 100.0 * count as f64 / nrows as f64 };
        builder.push_record([value.to_string(), count.to_string(), format!("{share:.1}%")]);
    }
    finish_table(builder)
}

fn finish_table(builder: tabled::builder::Builder) -> String {
    let mut table = builder.build();
    table
        .with(tabled::settings::style::Style::blank())
        .with(tabled::settings::Alignment::left());
    table.to_string()
}

/// Linear-interpolation quantile over already-sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
