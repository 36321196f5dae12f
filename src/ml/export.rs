//! Numeric exporter
//!
//! Turns the selected model into a self-contained C++ header for the
//! microcontroller. Linear models become a coefficient table plus a dot
//! product; tree models become nested conditional expressions over `x[i]`.
//! Models without a portable form are refused.

use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

use super::evaluation::TrainedModel;
use super::persistence::write_atomic;
use super::{PortableModel, PortableTree};
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureSet;

/// Arithmetic/conditional expression over an input vector `x`
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Feature(usize),
    Sum(Vec<Expr>),
    Product(Box<Expr>, Box<Expr>),
    /// `x[feature] <= threshold ? then : otherwise`
    IfLe {
        feature: usize,
        threshold: f64,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn eval(&self, x: &[f64]) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Feature(i) => x[*i],
            Expr::Sum(terms) => terms.iter().map(|t| t.eval(x)).sum(),
            Expr::Product(a, b) => a.eval(x) * b.eval(x),
            Expr::IfLe {
                feature,
                threshold,
                then,
                otherwise,
            } => {
                if x[*feature] <= *threshold {
                    then.eval(x)
                } else {
                    otherwise.eval(x)
                }
            }
        }
    }

    /// Renders as a C expression.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Expr::Const(v) => {
                let _ = write!(out, "{:?}", v);
            }
            Expr::Feature(i) => {
                let _ = write!(out, "x[{}]", i);
            }
            Expr::Sum(terms) => {
                out.push('(');
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" + ");
                    }
                    term.render_into(out);
                }
                out.push(')');
            }
            Expr::Product(a, b) => {
                a.render_into(out);
                out.push_str(" * ");
                b.render_into(out);
            }
            Expr::IfLe {
                feature,
                threshold,
                then,
                otherwise,
            } => {
                let _ = write!(out, "(x[{}] <= {:?} ? ", feature, threshold);
                then.render_into(out);
                out.push_str(" : ");
                otherwise.render_into(out);
                out.push(')');
            }
        }
    }
}

fn tree_expr(tree: &PortableTree) -> Expr {
    match tree {
        PortableTree::Leaf(v) => Expr::Const(*v),
        PortableTree::Split {
            feature,
            threshold,
            left,
            right,
        } => Expr::IfLe {
            feature: *feature,
            threshold: *threshold,
            then: Box::new(tree_expr(left)),
            otherwise: Box::new(tree_expr(right)),
        },
    }
}

/// Expression equivalent to a portable model, or `None` for `Other`.
pub fn expression(model: &PortableModel) -> Option<Expr> {
    match model {
        PortableModel::Linear {
            coefficients,
            intercept,
        } => {
            let mut terms: Vec<Expr> = coefficients
                .iter()
                .enumerate()
                .map(|(i, c)| Expr::Product(Box::new(Expr::Const(*c)), Box::new(Expr::Feature(i))))
                .collect();
            terms.push(Expr::Const(*intercept));
            Some(Expr::Sum(terms))
        }
        PortableModel::TreeEnsemble { base, scale, trees } => {
            let summed = match trees.as_slice() {
                [single] => tree_expr(single),
                many => Expr::Sum(many.iter().map(tree_expr).collect()),
            };
            let scaled = if *scale == 1.0 {
                summed
            } else {
                Expr::Product(Box::new(Expr::Const(*scale)), Box::new(summed))
            };
            Some(if *base == 0.0 {
                scaled
            } else {
                Expr::Sum(vec![Expr::Const(*base), scaled])
            })
        }
        PortableModel::Other { .. } => None,
    }
}

/// C identifier derived from a display name
fn class_name(display_name: &str) -> String {
    let mut name: String = display_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn header_preamble(out: &mut String, display_name: &str, features: &FeatureSet) {
    let _ = writeln!(out, "#pragma once");
    let _ = writeln!(out, "// Irrigation minutes predictor: {}", display_name);
    let _ = writeln!(out, "// Input x[] order: {}", features.names().join(", "));
    let _ = writeln!(out, "// Inputs must be imputed and standardized with the saved scaler.");
    let _ = writeln!(out);
}

fn render_linear(
    display_name: &str,
    features: &FeatureSet,
    coefficients: &[f64],
    intercept: f64,
) -> String {
    let class = class_name(display_name);
    let n = coefficients.len();
    let mut out = String::new();
    header_preamble(&mut out, display_name, features);
    let _ = writeln!(out, "namespace Irrigation {{");
    let _ = writeln!(out, "    class {} {{", class);
    let _ = writeln!(out, "        public:");
    let _ = writeln!(out, "            float predict(const float *x) const {{");
    let _ = writeln!(out, "                return dot(x) + {:.8}f;", intercept);
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out);
    let _ = writeln!(out, "        protected:");
    let _ = writeln!(out, "            static constexpr unsigned N_FEATURES = {};", n);
    let _ = writeln!(out, "            static constexpr float COEFFICIENTS[{}] = {{", n.max(1));
    if n == 0 {
        let _ = writeln!(out, "                0.00000000f");
    }
    for (i, (c, name)) in coefficients.iter().zip(features.names()).enumerate() {
        let sep = if i + 1 < n { "," } else { "" };
        let _ = writeln!(out, "                {:.8}f{} // {}", c, sep, name);
    }
    let _ = writeln!(out, "            }};");
    let _ = writeln!(out);
    let _ = writeln!(out, "            float dot(const float *x) const {{");
    let _ = writeln!(out, "                float acc = 0.0f;");
    let _ = writeln!(out, "                for (unsigned i = 0; i < N_FEATURES; i++) {{");
    let _ = writeln!(out, "                    acc += x[i] * COEFFICIENTS[i];");
    let _ = writeln!(out, "                }}");
    let _ = writeln!(out, "                return acc;");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "    }};");
    let _ = writeln!(out, "}}");
    out
}

fn render_expression(display_name: &str, features: &FeatureSet, expr: &Expr) -> String {
    let class = class_name(display_name);
    let mut out = String::new();
    header_preamble(&mut out, display_name, features);
    let _ = writeln!(out, "namespace Irrigation {{");
    let _ = writeln!(out, "    class {} {{", class);
    let _ = writeln!(out, "        public:");
    let _ = writeln!(out, "            float predict(const float *x) const {{");
    let _ = writeln!(out, "                return {};", expr.render());
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "    }};");
    let _ = writeln!(out, "}}");
    out
}

/// Renders the header text for a portable model.
pub fn render(
    display_name: &str,
    portable: &PortableModel,
    features: &FeatureSet,
) -> PipelineResult<String> {
    let width = match portable {
        PortableModel::Linear { coefficients, .. } => Some(coefficients.len()),
        _ => None,
    };
    if let Some(width) = width {
        if width != features.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: features.len(),
                actual: width,
            });
        }
    }

    match portable {
        PortableModel::Linear {
            coefficients,
            intercept,
        } => Ok(render_linear(display_name, features, coefficients, *intercept)),
        PortableModel::TreeEnsemble { .. } => match expression(portable) {
            Some(expr) => Ok(render_expression(display_name, features, &expr)),
            None => Err(unsupported(display_name, portable)),
        },
        PortableModel::Other { .. } => Err(unsupported(display_name, portable)),
    }
}

fn unsupported(display_name: &str, portable: &PortableModel) -> PipelineError {
    let kind = match portable {
        PortableModel::Other { kind } => kind.clone(),
        other => other.tag().to_string(),
    };
    PipelineError::UnsupportedExport {
        model: display_name.to_string(),
        kind,
    }
}

/// Writes exported headers into one directory, keyed by display name
#[derive(Debug, Clone)]
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, display_name: &str) -> PathBuf {
        self.dir.join(format!("{}.h", display_name))
    }

    /// Renders the whole header in memory, then places it atomically.
    pub fn export(&self, model: &TrainedModel, features: &FeatureSet) -> PipelineResult<PathBuf> {
        let portable = model.model.portable()?;
        let text = render(model.display_name(), &portable, features)?;
        let path = self.path_for(model.display_name());
        write_atomic(&path, text.as_bytes())?;
        info!(
            model = %model.name(),
            form = portable.tag(),
            path = %path.display(),
            "model exported"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Hyperparameters, ModelKind, ModelSpec};
    use crate::ml::evaluation::TestMetrics;
    use crate::ml::models::LinearRegression;
    use crate::ml::Regressor;
    use tempfile::TempDir;

    fn features() -> FeatureSet {
        FeatureSet::new(vec!["temperature".into(), "humidity".into()])
    }

    fn scenario() -> PortableModel {
        PortableModel::Linear {
            coefficients: vec![0.5, -0.2],
            intercept: 1.0,
        }
    }

    #[test]
    fn test_linear_expression_matches_formula() {
        let expr = expression(&scenario()).unwrap();
        for (t, h) in [(20.0, 70.0), (32.0, 20.0), (-4.5, 0.0), (0.0, 100.0)] {
            let expected = 0.5 * t - 0.2 * h + 1.0;
            assert!((expr.eval(&[t, h]) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_linear_header_text() {
        let text = render("LinearRegression", &scenario(), &features()).unwrap();
        assert!(text.starts_with("#pragma once"));
        assert!(text.contains("class LinearRegression"));
        assert!(text.contains("0.50000000f, // temperature"));
        assert!(text.contains("-0.20000000f // humidity"));
        assert!(text.contains("return dot(x) + 1.00000000f;"));
        assert!(text.contains("N_FEATURES = 2"));
    }

    #[test]
    fn test_linear_width_must_match_features() {
        let one = FeatureSet::new(vec!["temperature".into()]);
        assert!(matches!(
            render("LinearRegression", &scenario(), &one),
            Err(PipelineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_tree_ensemble_expression() {
        let tree = PortableTree::Split {
            feature: 1,
            threshold: 40.0,
            left: Box::new(PortableTree::Leaf(10.0)),
            right: Box::new(PortableTree::Leaf(0.0)),
        };
        let portable = PortableModel::TreeEnsemble {
            base: 2.0,
            scale: 0.5,
            trees: vec![tree.clone(), tree],
        };
        let expr = expression(&portable).unwrap();
        assert_eq!(expr.eval(&[0.0, 30.0]), 12.0);
        assert_eq!(expr.eval(&[0.0, 50.0]), 2.0);

        let text = render("GradientBoostingRegressor", &portable, &features()).unwrap();
        assert!(text.contains("(x[1] <= 40.0 ? 10.0 : 0.0)"));
        assert!(text.contains("return (2.0 + 0.5 * ("));
    }

    #[test]
    fn test_single_tree_renders_bare_conditional() {
        let portable = PortableModel::TreeEnsemble {
            base: 0.0,
            scale: 1.0,
            trees: vec![PortableTree::Split {
                feature: 0,
                threshold: 25.5,
                left: Box::new(PortableTree::Leaf(1.0)),
                right: Box::new(PortableTree::Leaf(5.0)),
            }],
        };
        let text = render("DecisionTreeRegressor", &portable, &features()).unwrap();
        assert!(text.contains("return (x[0] <= 25.5 ? 1.0 : 5.0);"));
    }

    #[test]
    fn test_other_is_unsupported() {
        let portable = PortableModel::Other {
            kind: "kernel ridge".into(),
        };
        match render("KernelRidge", &portable, &features()) {
            Err(PipelineError::UnsupportedExport { model, kind }) => {
                assert_eq!(model, "KernelRidge");
                assert_eq!(kind, "kernel ridge");
            }
            other => panic!("expected unsupported export, got {other:?}"),
        }
    }

    #[test]
    fn test_export_writes_keyed_file() {
        let dir = TempDir::new().unwrap();
        let model = TrainedModel {
            spec: ModelSpec::new("linear_regression", ModelKind::LinearRegression, Hyperparameters::default()),
            model: Box::new(LinearRegression::from_parameters(vec![0.5, -0.2], 1.0)),
            training_score: 1.0,
            cv_rmse: 0.0,
            test: TestMetrics {
                score: 1.0,
                rmse: 0.0,
                mae: 0.0,
                r2: 1.0,
            },
            predictions: vec![],
        };
        assert_eq!(model.model.kind(), ModelKind::LinearRegression);

        let exporter = Exporter::new(dir.path());
        let path = exporter.export(&model, &features()).unwrap();
        assert_eq!(path, dir.path().join("LinearRegression.h"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("// Input x[] order: temperature, humidity"));
    }

    #[test]
    fn test_class_name_sanitized() {
        assert_eq!(class_name("Gradient Boosting"), "Gradient_Boosting");
        assert_eq!(class_name("3tree"), "_3tree");
    }
}
