//! Scalar summaries of accumulated precision/recall tensors.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::accumulate::{Accumulation, SENTINEL};
use crate::params::Params;

/// Which tensor a summary reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Average precision over the recall grid.
    Precision,
    /// Average of the final recall.
    Recall,
}

/// One summary statistic: a tensor slice and how it is labeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub name: String,
    pub metric: Metric,
    /// `None` averages over every threshold.
    pub iou_threshold: Option<f64>,
    pub area: String,
    pub max_detections: usize,
}

impl SummaryConfig {
    pub fn new(
        name: impl Into<String>,
        metric: Metric,
        iou_threshold: Option<f64>,
        area: impl Into<String>,
        max_detections: usize,
    ) -> Self {
        Self {
            name: name.into(),
            metric,
            iou_threshold,
            area: area.into(),
            max_detections,
        }
    }
}

/// The twelve standard box statistics.
///
/// AR at one and ten detections use the first two caps when three or more
/// are configured and the largest cap otherwise.
pub fn detection_configs(params: &Params) -> Vec<SummaryConfig> {
    use Metric::{Precision, Recall};

    let max_det = params.max_detection_cap();
    let (first, second) = match params.max_detections.as_slice() {
        [a, b, _, ..] => (*a, *b),
        _ => (max_det, max_det),
    };

    vec![
        SummaryConfig::new("AP", Precision, None, "all", max_det),
        SummaryConfig::new("AP50", Precision, Some(0.5), "all", max_det),
        SummaryConfig::new("AP75", Precision, Some(0.75), "all", max_det),
        SummaryConfig::new("AP_small", Precision, None, "small", max_det),
        SummaryConfig::new("AP_medium", Precision, None, "medium", max_det),
        SummaryConfig::new("AP_large", Precision, None, "large", max_det),
        SummaryConfig::new(format!("AR{}", first), Recall, None, "all", first),
        SummaryConfig::new(format!("AR{}", second), Recall, None, "all", second),
        SummaryConfig::new(format!("AR{}", max_det), Recall, None, "all", max_det),
        SummaryConfig::new("AR_small", Recall, None, "small", max_det),
        SummaryConfig::new("AR_medium", Recall, None, "medium", max_det),
        SummaryConfig::new("AR_large", Recall, None, "large", max_det),
    ]
}

/// The ten standard keypoint statistics.
pub fn keypoint_configs(params: &Params) -> Vec<SummaryConfig> {
    use Metric::{Precision, Recall};

    let max_det = params.max_detection_cap();
    vec![
        SummaryConfig::new("AP", Precision, None, "all", max_det),
        SummaryConfig::new("AP50", Precision, Some(0.5), "all", max_det),
        SummaryConfig::new("AP75", Precision, Some(0.75), "all", max_det),
        SummaryConfig::new("AP_medium", Precision, None, "medium", max_det),
        SummaryConfig::new("AP_large", Precision, None, "large", max_det),
        SummaryConfig::new("AR", Recall, None, "all", max_det),
        SummaryConfig::new("AR50", Recall, Some(0.5), "all", max_det),
        SummaryConfig::new("AR75", Recall, Some(0.75), "all", max_det),
        SummaryConfig::new("AR_medium", Recall, None, "medium", max_det),
        SummaryConfig::new("AR_large", Recall, None, "large", max_det),
    ]
}

/// A computed statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStat {
    pub config: SummaryConfig,
    /// Mean over the slice, or -1 when every entry was a sentinel.
    pub value: f64,
    iou_label: String,
}

impl SummaryStat {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl fmt::Display for SummaryStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (title, short) = match self.config.metric {
            Metric::Precision => ("Average Precision", "(AP)"),
            Metric::Recall => ("Average Recall", "(AR)"),
        };
        write!(
            f,
            " {:<18} {} @[ IoU={:<9} | area={:>6} | maxDets={:>3} ] = {:0.3}",
            title, short, self.iou_label, self.config.area, self.config.max_detections, self.value
        )
    }
}

/// Ordered list of named statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub stats: Vec<SummaryStat>,
}

impl Summary {
    /// Look a statistic up by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.stats.iter().find(|s| s.name() == name).map(|s| s.value)
    }

    /// Values in configuration order.
    pub fn values(&self) -> Vec<f64> {
        self.stats.iter().map(|s| s.value).collect()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stat in &self.stats {
            writeln!(f, "{}", stat)?;
        }
        Ok(())
    }
}

/// Mean of the non-sentinel entries, [`SENTINEL`] when there are none.
fn mean_defined(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|&v| v > SENTINEL)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        SENTINEL
    } else {
        sum / count as f64
    }
}

/// Compute one statistic.
///
/// A threshold, size label or cap that the parameters do not contain selects
/// an empty slice, which yields -1.
pub fn summarize_stat(accumulation: &Accumulation, config: &SummaryConfig) -> f64 {
    let params = &accumulation.params;
    let shape = accumulation.shape;

    let thresholds: Vec<usize> = match config.iou_threshold {
        Some(threshold) => params.threshold_index(threshold).into_iter().collect(),
        None => (0..shape.t).collect(),
    };
    let (Some(a), Some(m)) = (
        params.area_index(&config.area),
        params.cap_index(config.max_detections),
    ) else {
        debug!("summary '{}' selects no size range or cap", config.name);
        return SENTINEL;
    };

    match config.metric {
        Metric::Precision => mean_defined(thresholds.iter().flat_map(|&t| {
            (0..shape.r).flat_map(move |r| {
                (0..shape.k).map(move |k| accumulation.precision_at(t, r, k, a, m))
            })
        })),
        Metric::Recall => mean_defined(
            thresholds
                .iter()
                .flat_map(|&t| (0..shape.k).map(move |k| accumulation.recall_at(t, k, a, m))),
        ),
    }
}

fn iou_label(params: &Params, threshold: Option<f64>) -> String {
    match (threshold, params.iou_thresholds.first(), params.iou_thresholds.last()) {
        (Some(t), _, _) => format!("{:0.2}", t),
        (None, Some(first), Some(last)) => format!("{:0.2}:{:0.2}", first, last),
        (None, _, _) => String::new(),
    }
}

/// Compute every configured statistic in order.
pub fn summarize(accumulation: &Accumulation, configs: &[SummaryConfig]) -> Summary {
    let stats = configs
        .iter()
        .map(|config| SummaryStat {
            value: summarize_stat(accumulation, config),
            iou_label: iou_label(&accumulation.params, config.iou_threshold),
            config: config.clone(),
        })
        .collect();
    Summary { stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::TensorShape;
    use crate::params::{AreaRange, SimilarityKind};
    use std::sync::Arc;

    fn accumulation(precision: Vec<f64>, recall: Vec<f64>) -> Accumulation {
        let params = Params::new(SimilarityKind::Bbox)
            .with_iou_thresholds(vec![0.5, 0.75])
            .with_area_ranges(vec![AreaRange::new("all", 0.0, 1e10)])
            .with_max_detections(vec![100]);
        let params = Params {
            recall_thresholds: vec![0.0, 1.0],
            ..params
        };
        let shape = TensorShape { t: 2, r: 2, k: 2, a: 1, m: 1 };
        Accumulation {
            params: Arc::new(params),
            shape,
            scores: vec![0.0; precision.len()],
            precision,
            recall,
        }
    }

    #[test]
    fn test_sentinels_are_dropped() {
        // [t][r][k]: category 1 has no positives.
        let acc = accumulation(
            vec![1.0, -1.0, 0.5, -1.0, 0.5, -1.0, 0.0, -1.0],
            vec![1.0, -1.0, 0.5, -1.0],
        );
        let ap = SummaryConfig::new("AP", Metric::Precision, None, "all", 100);
        assert!((summarize_stat(&acc, &ap) - 0.5).abs() < 1e-12);

        let ap50 = SummaryConfig::new("AP50", Metric::Precision, Some(0.5), "all", 100);
        assert!((summarize_stat(&acc, &ap50) - 0.75).abs() < 1e-12);

        let ar = SummaryConfig::new("AR", Metric::Recall, None, "all", 100);
        assert!((summarize_stat(&acc, &ar) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_all_sentinel_slice() {
        let acc = accumulation(vec![-1.0; 8], vec![-1.0; 4]);
        let ap = SummaryConfig::new("AP", Metric::Precision, None, "all", 100);
        assert_eq!(summarize_stat(&acc, &ap), -1.0);
    }

    #[test]
    fn test_unknown_slice_selectors() {
        let acc = accumulation(vec![1.0; 8], vec![1.0; 4]);
        let small = SummaryConfig::new("AP_small", Metric::Precision, None, "small", 100);
        assert_eq!(summarize_stat(&acc, &small), -1.0);
        let ap90 = SummaryConfig::new("AP90", Metric::Precision, Some(0.9), "all", 100);
        assert_eq!(summarize_stat(&acc, &ap90), -1.0);
        let ar1 = SummaryConfig::new("AR1", Metric::Recall, None, "all", 1);
        assert_eq!(summarize_stat(&acc, &ar1), -1.0);
    }

    #[test]
    fn test_standard_config_lists() {
        let bbox = detection_configs(&Params::new(SimilarityKind::Bbox));
        assert_eq!(bbox.len(), 12);
        assert_eq!(bbox[6].name, "AR1");
        assert_eq!(bbox[7].max_detections, 10);

        let kp = keypoint_configs(&Params::new(SimilarityKind::Keypoints));
        assert_eq!(kp.len(), 10);
        assert!(kp.iter().all(|c| c.max_detections == 20));
    }

    #[test]
    fn test_display_layout() {
        let acc = accumulation(vec![1.0; 8], vec![1.0; 4]);
        let summary = summarize(
            &acc,
            &[SummaryConfig::new("AP", Metric::Precision, None, "all", 100)],
        );
        assert_eq!(summary.get("AP"), Some(1.0));
        assert_eq!(
            summary.stats[0].to_string(),
            " Average Precision  (AP) @[ IoU=0.50:0.75 | area=   all | maxDets=100 ] = 1.000"
        );
    }
}
