//! Accuracy: top-k classification accuracy, overall and per class.
//!
//! Predictions are `[outer, classes, inner...]` scores; labels hold one class
//! index per `(outer, inner)` position. Output 0 is the overall accuracy
//! (shape `[1]`), the optional output 1 the per-class accuracy (shape
//! `[classes]`).

use std::cmp::Ordering;

use kiln_core::{Device, Element, Tensor};
use kiln_kernels::{Context, CpuContext};

use crate::def::OperatorDef;
use crate::operator::{CreateOperator, Operator, OperatorBase};
use crate::registry::OperatorRegistry;
use crate::schema::OpSchema;
use crate::{dispatch_types, Result};

pub const OP_TYPE: &str = "Accuracy";

/// Problem extents derived from the prediction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extents {
    pub outer: usize,
    pub classes: usize,
    pub inner: usize,
}

/// Accuracy figures for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyResult {
    /// Correct / scored, or 0 when nothing was scored.
    pub overall: f32,
    /// Correct / occurrences per class, 0 for classes that never occur.
    pub per_class: Vec<f32>,
}

/// Orders `(score, class)` pairs best first. Equal scores rank the larger
/// class index first; NaN sorts by `total_cmp`.
fn rank_desc(a: &(f32, usize), b: &(f32, usize)) -> Ordering {
    b.0.total_cmp(&a.0).then(b.1.cmp(&a.1))
}

/// Top-k accuracy over host data.
///
/// `scores` is laid out `[outer, classes, inner]`, `labels` `[outer, inner]`.
/// Labels listed in `ignore` are skipped; any other label outside
/// `[0, classes)` is an error (returned as a message).
pub fn compute_accuracy(
    scores: &[f32],
    labels: &[f32],
    ext: Extents,
    top_k: usize,
    ignore: &[i64],
) -> std::result::Result<AccuracyResult, String> {
    let Extents { outer, classes, inner } = ext;
    let dim = classes * inner;
    let mut correct = 0usize;
    let mut scored = 0usize;
    let mut correct_per = vec![0usize; classes];
    let mut occurrences = vec![0usize; classes];
    let mut ranked: Vec<(f32, usize)> = Vec::with_capacity(classes);

    for i in 0..outer {
        for j in 0..inner {
            let raw = labels[i * inner + j];
            let label = raw.trunc();
            if label.is_finite() && ignore.contains(&(label as i64)) {
                continue;
            }
            if !(label >= 0.0 && label < classes as f32) {
                return Err(format!(
                    "label {raw} at position {} is outside [0, {classes})",
                    i * inner + j
                ));
            }
            let label = label as usize;
            occurrences[label] += 1;

            ranked.clear();
            ranked.extend((0..classes).map(|k| (scores[i * dim + k * inner + j], k)));
            ranked.select_nth_unstable_by(top_k - 1, rank_desc);
            if ranked[..top_k].iter().any(|&(_, k)| k == label) {
                correct += 1;
                correct_per[label] += 1;
            }
            scored += 1;
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f32 / den as f32 };
    Ok(AccuracyResult {
        overall: ratio(correct, scored),
        per_class: correct_per
            .iter()
            .zip(&occurrences)
            .map(|(&c, &n)| ratio(c, n))
            .collect(),
    })
}

pub struct AccuracyOp<C: Context> {
    base: OperatorBase<C>,
    top_k: usize,
    ignore_labels: Vec<i64>,
}

impl<C: Context> AccuracyOp<C> {
    fn extents(&self, x: &Tensor, labels: &Tensor) -> Result<Extents> {
        if x.ndim() < 2 {
            return Err(self.base.shape_mismatch(format!(
                "predictions must have at least 2 dimensions, got shape {}",
                x.shape()
            )));
        }
        let ext = Extents {
            outer: x.dim(0)?,
            classes: x.dim(1)?,
            inner: x.count_from(2),
        };
        if ext.outer * ext.inner != labels.count() {
            return Err(self.base.shape_mismatch(format!(
                "outer_num ({}) * inner_num ({}) must equal the label count ({})",
                ext.outer,
                ext.inner,
                labels.count()
            )));
        }
        if self.top_k > ext.classes {
            return Err(self.base.invalid_argument(format!(
                "top_k ({}) exceeds the number of classes ({})",
                self.top_k, ext.classes
            )));
        }
        Ok(ext)
    }

    /// Labels as host floats, whatever their element type.
    fn read_labels(&self, labels: &Tensor) -> Result<Vec<f32>> {
        let ctx = self.base.context();
        let count = labels.count();
        let dtype = self.base.dtype_of(labels)?;
        dispatch_types!(self.base.name(), dtype, [f32, i64, i32], |L| {
            let values = ctx.read_host::<L>(count, labels.typed_storage::<L>()?)?;
            Ok(values.into_iter().map(Element::to_f32).collect())
        })
    }

    fn run_with_type<T: Element>(
        &self,
        ext: Extents,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
    ) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let labels = self.base.input(inputs, 1)?;
        let ctx = self.base.context();

        let scores: Vec<f32> = ctx
            .read_host::<T>(x.count(), x.typed_storage::<T>()?)?
            .into_iter()
            .map(Element::to_f32)
            .collect();
        let labels = self.read_labels(labels)?;
        let result = compute_accuracy(&scores, &labels, ext, self.top_k, &self.ignore_labels)
            .map_err(|msg| self.base.invalid_argument(msg))?;
        tracing::trace!(op = self.base.name(), accuracy = result.overall, "accuracy");

        let overall = [T::from_f32(result.overall)];
        ctx.write_host(self.base.output(outputs, 0)?.mutable_storage::<T>()?, &overall)?;
        if outputs.len() > 1 {
            let per_class: Vec<T> = result.per_class.iter().map(|&v| T::from_f32(v)).collect();
            ctx.write_host(self.base.output(outputs, 1)?.mutable_storage::<T>()?, &per_class)?;
        }
        Ok(())
    }
}

impl<C: Context> Operator for AccuracyOp<C> {
    fn def(&self) -> &OperatorDef {
        self.base.def()
    }

    fn device(&self) -> Device {
        self.base.context().device()
    }

    fn run_on_device(&mut self, inputs: &[Tensor], outputs: &mut [Tensor]) -> Result<()> {
        let x = self.base.input(inputs, 0)?;
        let labels = self.base.input(inputs, 1)?;
        let ext = self.extents(x, labels)?;
        let dtype = self.base.dtype_of(x)?;

        self.base.output(outputs, 0)?.reshape([1]);
        if outputs.len() > 1 {
            self.base.output(outputs, 1)?.reshape([ext.classes]);
        }
        dispatch_types!(self.base.name(), dtype, [f32], |T| {
            self.run_with_type::<T>(ext, inputs, outputs)
        })
    }

    fn synchronize(&self) -> Result<()> {
        Ok(self.base.context().synchronize()?)
    }
}

impl<C: Context> CreateOperator for AccuracyOp<C> {
    type Context = C;

    fn create(base: OperatorBase<C>) -> Result<Self> {
        let top_k = base.arg_i64("top_k", 1)?;
        if top_k < 1 {
            return Err(base.invalid_argument(format!("top_k must be at least 1, got {top_k}")));
        }
        let ignore_labels = base.arg_ints("ignore_labels")?;
        Ok(Self {
            base,
            top_k: top_k as usize,
            ignore_labels,
        })
    }
}

pub(crate) fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_schema(
        OpSchema::new(OP_TYPE)
            .num_inputs(2)
            .num_outputs_range(1, 2)
            .doc("Top-k accuracy of predictions against labels, overall and per class."),
    )?;
    registry.deploy::<AccuracyOp<CpuContext>>(OP_TYPE)?;
    #[cfg(feature = "cuda")]
    registry.deploy::<AccuracyOp<kiln_kernels::CudaContext>>(OP_TYPE)?;
    registry.register_no_gradient(OP_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(outer: usize, classes: usize, inner: usize) -> Extents {
        Extents { outer, classes, inner }
    }

    #[test]
    fn test_rank_desc_tie_break() {
        let mut v = vec![(0.5, 0), (0.9, 1), (0.5, 2), (f32::NAN, 3)];
        v.sort_by(rank_desc);
        let order: Vec<usize> = v.iter().map(|&(_, k)| k).collect();
        // Positive NaN is the largest value under total ordering.
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_tie_prefers_larger_class() {
        let scores = [0.5, 0.5, 0.5, 0.5];
        let at = |label: f32| {
            compute_accuracy(&scores, &[label], ext(1, 4, 1), 1, &[]).unwrap().overall
        };
        assert_eq!(at(3.0), 1.0);
        assert_eq!(at(0.0), 0.0);
    }

    #[test]
    fn test_inner_layout() {
        // outer=1, classes=2, inner=2: scores[k * inner + j].
        let scores = [0.9, 0.1, 0.1, 0.9];
        let r = compute_accuracy(&scores, &[0.0, 1.0], ext(1, 2, 2), 1, &[]).unwrap();
        assert_eq!(r.overall, 1.0);
        assert_eq!(r.per_class, vec![1.0, 1.0]);
    }

    #[test]
    fn test_labels_truncate() {
        let scores = [0.1, 0.8, 0.1];
        let r = compute_accuracy(&scores, &[1.7], ext(1, 3, 1), 1, &[]).unwrap();
        assert_eq!(r.overall, 1.0);
    }

    #[test]
    fn test_out_of_range_label() {
        let scores = [0.1, 0.9];
        let err = compute_accuracy(&scores, &[2.0], ext(1, 2, 1), 1, &[]).unwrap_err();
        assert!(err.contains("outside [0, 2)"), "{err}");
        assert!(compute_accuracy(&scores, &[f32::NAN], ext(1, 2, 1), 1, &[]).is_err());
    }

    #[test]
    fn test_ignored_out_of_range_label_is_skipped() {
        let scores = [0.1, 0.9, 0.8, 0.2];
        let r = compute_accuracy(&scores, &[-1.0, 0.0], ext(2, 2, 1), 1, &[-1]).unwrap();
        assert_eq!(r.overall, 1.0);
    }

    #[test]
    fn test_all_ignored_is_zero() {
        let scores = [0.1, 0.9];
        let r = compute_accuracy(&scores, &[1.0], ext(1, 2, 1), 1, &[1]).unwrap();
        assert_eq!(r.overall, 0.0);
        assert_eq!(r.per_class, vec![0.0, 0.0]);
    }

    #[test]
    fn test_create_validates_top_k() {
        let def = OperatorDef::new(OP_TYPE, ["x", "l"], ["a"]).with_arg("top_k", 0);
        let base = OperatorBase::<CpuContext>::new(def, Device::Cpu).unwrap();
        assert!(matches!(
            AccuracyOp::create(base),
            Err(crate::Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_top_k_checked_before_outputs_are_shaped() {
        let def = OperatorDef::new(OP_TYPE, ["x", "l"], ["a", "p"]).with_arg("top_k", 3);
        let mut op =
            AccuracyOp::create(OperatorBase::<CpuContext>::new(def, Device::Cpu).unwrap()).unwrap();
        let x = Tensor::from_f32(&[0.1, 0.9, 0.8, 0.2], &[2, 2]);
        let l = Tensor::from_f32(&[1.0, 0.0], &[2]);
        let mut outputs = [Tensor::empty(Device::Cpu), Tensor::empty(Device::Cpu)];
        assert!(matches!(
            op.run_on_device(&[x.clone(), l.clone()], &mut outputs),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert_eq!(outputs[0].count(), 0);
        assert!(!outputs[1].is_allocated());

        let def = OperatorDef::new(OP_TYPE, ["x", "l"], ["a", "p"]).with_arg("top_k", 2);
        let mut op =
            AccuracyOp::create(OperatorBase::<CpuContext>::new(def, Device::Cpu).unwrap()).unwrap();
        op.run_on_device(&[x, l], &mut outputs).unwrap();
        assert_eq!(outputs[0].data::<f32>().unwrap(), &[1.0]);
        assert_eq!(outputs[1].data::<f32>().unwrap(), &[1.0, 1.0]);
    }

    #[test]
    fn test_rank_one_predictions_rejected() {
        let def = OperatorDef::new(OP_TYPE, ["x", "l"], ["a"]);
        let mut op =
            AccuracyOp::create(OperatorBase::<CpuContext>::new(def, Device::Cpu).unwrap()).unwrap();
        let x = Tensor::from_f32(&[0.1, 0.9], &[2]);
        let l = Tensor::from_f32(&[1.0], &[1]);
        let mut outputs = [Tensor::empty(Device::Cpu)];
        assert!(matches!(
            op.run_on_device(&[x, l], &mut outputs),
            Err(crate::Error::ShapeMismatch { .. })
        ));
    }
}
