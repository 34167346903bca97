/// 三边定位求解器
///
/// 支持：
/// - 非线性最小二乘（Levenberg-Marquardt），未知量 (x, y, r)，r 为三个距离共有的偏差
/// - 两圆交点闭式解，第三个距离仅用于在两个交点中选择
/// - 线性化三圆闭式解
///
/// 所有求解器都实现 `Trilaterate`，管线只依赖该 trait

use crate::error::{ConfigError, SolverError};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 三角形面积（叉积）相对最长边平方的下限，低于该值视为共线
const DEGENERATE_GEOMETRY_RATIO: f64 = 1e-6;
/// 残差平方和低于该值时视为精确解
const EXACT_FIT_COST: f64 = 1e-24;
const MIN_DAMPING: f64 = 1e-15;
const MAX_DAMPING: f64 = 1e12;

/// 一个 (坐标, 距离) 对
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
    /// 估计距离（米）
    pub distance: f64,
}

impl Anchor {
    pub fn new(x: f64, y: f64, distance: f64) -> Self {
        Anchor { x, y, distance }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.distance.is_finite()
    }
}

/// 求解结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fix {
    pub x: f64,
    pub y: f64,
    /// 距离偏差项 r（闭式解恒为 0）
    pub bias: f64,
    /// 使用的迭代次数（闭式解为 0）
    pub iterations: usize,
    /// 求解器目标函数的最终值
    pub cost: f64,
    /// 几何距离误差的均方根（米），不同求解器之间可比较
    pub rms_error: f64,
}

/// 三边定位求解器接口
pub trait Trilaterate: Send {
    /// 算法名称
    fn name(&self) -> &'static str;

    /// 根据三个 (坐标, 距离) 对求解位置
    fn solve(&mut self, anchors: &[Anchor; 3]) -> Result<Fix, SolverError>;
}

/// 判断三个点是否近似共线
pub fn is_degenerate(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1);
    let side = |p: (f64, f64), q: (f64, f64)| (p.0 - q.0).powi(2) + (p.1 - q.1).powi(2);
    let longest = side(a, b).max(side(b, c)).max(side(a, c));
    if longest <= f64::EPSILON {
        return true;
    }
    cross.abs() <= DEGENERATE_GEOMETRY_RATIO * longest
}

fn check_inputs(anchors: &[Anchor; 3]) -> Result<(), SolverError> {
    if anchors.iter().any(|a| !a.is_finite() || a.distance < 0.0) {
        return Err(SolverError::NonFinite);
    }
    let [a, b, c] = anchors;
    if is_degenerate((a.x, a.y), (b.x, b.y), (c.x, c.y)) {
        return Err(SolverError::DegenerateGeometry);
    }
    Ok(())
}

/// 几何距离误差的均方根
fn range_rms_error(anchors: &[Anchor; 3], x: f64, y: f64) -> f64 {
    let sum: f64 = anchors
        .iter()
        .map(|a| {
            let calculated = ((x - a.x).powi(2) + (y - a.y).powi(2)).sqrt();
            (calculated - a.distance).powi(2)
        })
        .sum();
    (sum / anchors.len() as f64).sqrt()
}

fn finish(
    anchors: &[Anchor; 3],
    x: f64,
    y: f64,
    bias: f64,
    iterations: usize,
    cost: f64,
) -> Result<Fix, SolverError> {
    if !x.is_finite() || !y.is_finite() || !bias.is_finite() {
        return Err(SolverError::NonFinite);
    }
    Ok(Fix {
        x,
        y,
        bias,
        iterations,
        cost,
        rms_error: range_rms_error(anchors, x, y),
    })
}

// ============================================================================
// 非线性最小二乘
// ============================================================================

/// 迭代初始值
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialGuess {
    /// (0, 0, 0)
    #[default]
    Origin,
    /// 线性化闭式解作为 (x, y)，r = 0；闭式解失败时退回原点
    Linear,
}

/// Levenberg-Marquardt 最小二乘求解器
///
/// 残差: f_i(x, y, r) = (x - x_i)² + (y - y_i)² - (d_i - r)²
///
/// 三个方程三个未知数，方程组可能有多个精确解；从原点出发时，
/// 目标位于远离原点的一侧可能收敛到另一组 (x, y, r)。
/// `InitialGuess::Linear` 从线性化解出发，无噪声输入时直接落在 r = 0 的解上。
#[derive(Clone, Debug, PartialEq)]
pub struct LeastSquaresSolver {
    /// 最大迭代次数
    pub max_iterations: usize,
    /// 相对步长收敛阈值
    pub tolerance: f64,
    /// 初始阻尼系数
    pub initial_damping: f64,
    pub initial_guess: InitialGuess,
}

impl Default for LeastSquaresSolver {
    fn default() -> Self {
        LeastSquaresSolver {
            max_iterations: 100,
            tolerance: 1e-12,
            initial_damping: 1e-3,
            initial_guess: InitialGuess::Origin,
        }
    }
}

impl LeastSquaresSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        LeastSquaresSolver {
            max_iterations,
            tolerance,
            ..Self::default()
        }
    }

    pub fn with_initial_guess(mut self, initial_guess: InitialGuess) -> Self {
        self.initial_guess = initial_guess;
        self
    }

    fn starting_point(&self, anchors: &[Anchor; 3]) -> Vector3<f64> {
        match self.initial_guess {
            InitialGuess::Origin => Vector3::zeros(),
            InitialGuess::Linear => match LinearSolver.solve(anchors) {
                Ok(fix) => Vector3::new(fix.x, fix.y, 0.0),
                Err(_) => Vector3::zeros(),
            },
        }
    }

    fn residuals_and_jacobian(anchors: &[Anchor; 3], p: &Vector3<f64>) -> (Vector3<f64>, Matrix3<f64>) {
        let mut f = Vector3::zeros();
        let mut j = Matrix3::zeros();
        for (i, a) in anchors.iter().enumerate() {
            let dx = p.x - a.x;
            let dy = p.y - a.y;
            let dr = a.distance - p.z;
            f[i] = dx * dx + dy * dy - dr * dr;
            j[(i, 0)] = 2.0 * dx;
            j[(i, 1)] = 2.0 * dy;
            j[(i, 2)] = 2.0 * dr;
        }
        (f, j)
    }
}

impl Trilaterate for LeastSquaresSolver {
    fn name(&self) -> &'static str {
        "least_squares"
    }

    fn solve(&mut self, anchors: &[Anchor; 3]) -> Result<Fix, SolverError> {
        check_inputs(anchors)?;

        let mut p = self.starting_point(anchors);
        let (mut f, mut j) = Self::residuals_and_jacobian(anchors, &p);
        let mut cost = f.norm_squared();
        let mut lambda = self.initial_damping;

        for iteration in 1..=self.max_iterations {
            if cost <= EXACT_FIT_COST {
                return finish(anchors, p.x, p.y, p.z, iteration - 1, cost);
            }

            let jtj = j.transpose() * j;
            let gradient = j.transpose() * f;
            let mut accepted = None;

            while lambda <= MAX_DAMPING {
                let mut damped = jtj;
                for k in 0..3 {
                    damped[(k, k)] += lambda * jtj[(k, k)];
                }
                let step = damped
                    .lu()
                    .solve(&(-gradient))
                    .ok_or(SolverError::Singular { iteration })?;

                let candidate = p + step;
                let (cf, cj) = Self::residuals_and_jacobian(anchors, &candidate);
                let candidate_cost = cf.norm_squared();
                if candidate_cost.is_finite() && candidate_cost < cost {
                    p = candidate;
                    f = cf;
                    j = cj;
                    cost = candidate_cost;
                    lambda = (lambda * 0.1).max(MIN_DAMPING);
                    accepted = Some(step.norm());
                    break;
                }
                lambda *= 10.0;
            }

            match accepted {
                // 任何阻尼下都无法再下降：已到达（局部）极小值
                None => return finish(anchors, p.x, p.y, p.z, iteration, cost),
                Some(step_norm) if step_norm <= self.tolerance * (1.0 + p.norm()) => {
                    return finish(anchors, p.x, p.y, p.z, iteration, cost);
                }
                Some(_) => {}
            }
        }

        if cost <= EXACT_FIT_COST {
            return finish(anchors, p.x, p.y, p.z, self.max_iterations, cost);
        }
        Err(SolverError::NotConverged {
            iterations: self.max_iterations,
            cost,
        })
    }
}

// ============================================================================
// 闭式解
// ============================================================================

/// 两圆交点求解器
///
/// 圆 1 与圆 2 的两个交点中，选择与圆 3 距离误差更小的一个
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TwoCircleSolver;

impl Trilaterate for TwoCircleSolver {
    fn name(&self) -> &'static str {
        "two_circle"
    }

    fn solve(&mut self, anchors: &[Anchor; 3]) -> Result<Fix, SolverError> {
        check_inputs(anchors)?;
        let [c1, c2, c3] = anchors;

        let dx = c2.x - c1.x;
        let dy = c2.y - c1.y;
        let separation = (dx * dx + dy * dy).sqrt();
        let (r1, r2) = (c1.distance, c2.distance);

        let slack = 1e-9 * separation.max(1.0);
        if separation > r1 + r2 + slack || separation < (r1 - r2).abs() - slack {
            return Err(SolverError::NoIntersection { separation, r1, r2 });
        }

        let a = (r1 * r1 - r2 * r2 + separation * separation) / (2.0 * separation);
        let h = (r1 * r1 - a * a).max(0.0).sqrt();
        let mx = c1.x + a * dx / separation;
        let my = c1.y + a * dy / separation;
        let candidates = [
            (mx - h * dy / separation, my + h * dx / separation),
            (mx + h * dy / separation, my - h * dx / separation),
        ];

        let third_error = |(x, y): (f64, f64)| {
            (((x - c3.x).powi(2) + (y - c3.y).powi(2)).sqrt() - c3.distance).abs()
        };
        let (x, y) = if third_error(candidates[0]) <= third_error(candidates[1]) {
            candidates[0]
        } else {
            candidates[1]
        };

        finish(anchors, x, y, 0.0, 0, third_error((x, y)).powi(2))
    }
}

/// 线性化三圆求解器
///
/// 圆方程两两相减消去二次项，解 2x2 线性方程组
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearSolver;

impl Trilaterate for LinearSolver {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn solve(&mut self, anchors: &[Anchor; 3]) -> Result<Fix, SolverError> {
        check_inputs(anchors)?;

        let [a1, a2, a3] = anchors;
        let (x1, y1, r1) = (a1.x, a1.y, a1.distance);
        let (x2, y2, r2) = (a2.x, a2.y, a2.distance);
        let (x3, y3, r3) = (a3.x, a3.y, a3.distance);

        let a11 = 2.0 * (x2 - x1);
        let a12 = 2.0 * (y2 - y1);
        let a21 = 2.0 * (x3 - x1);
        let a22 = 2.0 * (y3 - y1);

        let b1 = r1 * r1 - r2 * r2 - x1 * x1 + x2 * x2 - y1 * y1 + y2 * y2;
        let b2 = r1 * r1 - r3 * r3 - x1 * x1 + x3 * x3 - y1 * y1 + y3 * y3;

        let det = a11 * a22 - a12 * a21;
        if det.abs() < 1e-10 {
            return Err(SolverError::Singular { iteration: 0 });
        }

        let x = (b1 * a22 - b2 * a12) / det;
        let y = (a11 * b2 - a21 * b1) / det;
        let rms = range_rms_error(anchors, x, y);
        finish(anchors, x, y, 0.0, 0, rms * rms * 3.0)
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 求解器类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    LeastSquares,
    TwoCircle,
    Linear,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverKind::LeastSquares => write!(f, "least_squares"),
            SolverKind::TwoCircle => write!(f, "two_circle"),
            SolverKind::Linear => write!(f, "linear"),
        }
    }
}

impl std::str::FromStr for SolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "least_squares" | "lm" => Ok(SolverKind::LeastSquares),
            "two_circle" => Ok(SolverKind::TwoCircle),
            "linear" => Ok(SolverKind::Linear),
            _ => Err(format!("unknown solver: {s}")),
        }
    }
}

/// 求解器配置
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub kind: SolverKind,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub initial_guess: InitialGuess,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let lm = LeastSquaresSolver::default();
        SolverConfig {
            kind: SolverKind::LeastSquares,
            max_iterations: lm.max_iterations,
            tolerance: lm.tolerance,
            initial_guess: lm.initial_guess,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidSolver("max_iterations 必须大于 0".to_string()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::InvalidSolver(format!(
                "tolerance 必须为正数，当前为 {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    /// 根据配置构造求解器
    pub fn build(&self) -> Box<dyn Trilaterate> {
        match self.kind {
            SolverKind::LeastSquares => Box::new(
                LeastSquaresSolver::new(self.max_iterations, self.tolerance)
                    .with_initial_guess(self.initial_guess),
            ),
            SolverKind::TwoCircle => Box::new(TwoCircleSolver),
            SolverKind::Linear => Box::new(LinearSolver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIVERS: [(f64, f64); 3] = [(0.0, 2.2), (3.2, 0.0), (3.2, 3.1)];

    fn exact_anchors(target: (f64, f64)) -> [Anchor; 3] {
        RECEIVERS.map(|(x, y)| {
            let d = ((target.0 - x).powi(2) + (target.1 - y).powi(2)).sqrt();
            Anchor::new(x, y, d)
        })
    }

    #[test]
    fn test_least_squares_exact_geometry() {
        let mut solver = LeastSquaresSolver::default();
        for target in [(1.0, 1.0), (2.0, 2.5), (0.5, 0.3), (3.0, 1.0)] {
            let fix = solver.solve(&exact_anchors(target)).unwrap();
            assert!((fix.x - target.0).abs() < 1e-6, "{:?} -> {:?}", target, fix);
            assert!((fix.y - target.1).abs() < 1e-6, "{:?} -> {:?}", target, fix);
            assert!(fix.bias.abs() < 1e-6);
            assert!(fix.iterations <= 20);
        }
    }

    #[test]
    fn test_least_squares_absorbs_common_bias() {
        // 所有距离都多出 0.4 米：r 吸收该偏差，位置不变
        let mut solver = LeastSquaresSolver::default();
        let anchors = exact_anchors((1.0, 1.0)).map(|a| Anchor::new(a.x, a.y, a.distance + 0.4));
        let fix = solver.solve(&anchors).unwrap();
        assert!(fix.cost < 1e-12);
        assert!((fix.x - 1.0).abs() < 1e-6 && (fix.y - 1.0).abs() < 1e-6);
        assert!((fix.bias - 0.4).abs() < 1e-6);
        for a in &anchors {
            let d = ((fix.x - a.x).powi(2) + (fix.y - a.y).powi(2)).sqrt();
            assert!((d - (a.distance - fix.bias).abs()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_linear_seed_far_from_origin() {
        // 接收器三角形远离原点时，线性初值仍收敛到 r = 0 的解
        let receivers = [(-3.52, -6.98), (3.02, -8.55), (0.72, -2.69)];
        let target = (-0.99, -4.89);
        let anchors = receivers.map(|(x, y)| {
            Anchor::new(x, y, ((target.0 - x).powi(2) + (target.1 - y).powi(2)).sqrt())
        });
        let mut solver = LeastSquaresSolver::default().with_initial_guess(InitialGuess::Linear);
        let fix = solver.solve(&anchors).unwrap();
        assert!((fix.x - target.0).abs() < 1e-6);
        assert!((fix.y - target.1).abs() < 1e-6);
    }

    #[test]
    fn test_least_squares_collinear_fails() {
        let mut solver = LeastSquaresSolver::default();
        let anchors = [
            Anchor::new(0.0, 0.0, 1.0),
            Anchor::new(1.0, 0.0, 1.0),
            Anchor::new(2.0, 1e-9, 1.0),
        ];
        assert_eq!(solver.solve(&anchors), Err(SolverError::DegenerateGeometry));
    }

    #[test]
    fn test_least_squares_iteration_cap() {
        let mut solver = LeastSquaresSolver::new(1, 1e-12);
        let result = solver.solve(&exact_anchors((2.0, 2.5)));
        assert!(matches!(result, Err(SolverError::NotConverged { iterations: 1, .. })));
    }

    #[test]
    fn test_non_finite_input() {
        let mut solver = LeastSquaresSolver::default();
        let mut anchors = exact_anchors((1.0, 1.0));
        anchors[1].distance = f64::NAN;
        assert_eq!(solver.solve(&anchors), Err(SolverError::NonFinite));
    }

    #[test]
    fn test_two_circle_exact_geometry() {
        let mut solver = TwoCircleSolver;
        for target in [(1.0, 1.0), (2.0, 2.5), (0.5, 0.3)] {
            let fix = solver.solve(&exact_anchors(target)).unwrap();
            assert!((fix.x - target.0).abs() < 1e-6);
            assert!((fix.y - target.1).abs() < 1e-6);
            assert!(fix.cost < 1e-12);
        }
    }

    #[test]
    fn test_two_circle_no_intersection() {
        let mut solver = TwoCircleSolver;
        let anchors = [
            Anchor::new(0.0, 2.2, 0.15),
            Anchor::new(3.2, 0.0, 1.0),
            Anchor::new(3.2, 3.1, 2.45),
        ];
        assert!(matches!(
            solver.solve(&anchors),
            Err(SolverError::NoIntersection { .. })
        ));
    }

    #[test]
    fn test_linear_exact_geometry() {
        let mut solver = LinearSolver;
        let fix = solver.solve(&exact_anchors((1.2, 0.7))).unwrap();
        assert!((fix.x - 1.2).abs() < 1e-9);
        assert!((fix.y - 0.7).abs() < 1e-9);
        assert!(fix.rms_error < 1e-9);
    }

    #[test]
    fn test_solver_kind_parse() {
        assert_eq!("least-squares".parse::<SolverKind>(), Ok(SolverKind::LeastSquares));
        assert_eq!("two_circle".parse::<SolverKind>(), Ok(SolverKind::TwoCircle));
        assert!("simplex".parse::<SolverKind>().is_err());
        assert_eq!(SolverConfig::default().build().name(), "least_squares");
    }
}
