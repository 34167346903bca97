/// 性质测试
///
/// - 缩放结果总在网格内
/// - 距离随 RSSI 严格递减
/// - 历史缓冲淘汰最旧记录
/// - 恒定输入下滤波器收敛，协方差单调不增
/// - 精确距离下三边定位还原目标点

use blutrack::algorithms::*;
use blutrack::channel::{ChannelHistory, SampleRecord};
use chrono::Utc;
use proptest::prelude::*;

const DEFAULT_LAYOUT: [(f64, f64); 3] = [(0.0, 2.2), (3.2, 0.0), (3.2, 3.1)];

fn exact_anchors(layout: [(f64, f64); 3], target: (f64, f64)) -> [Anchor; 3] {
    layout.map(|(x, y)| Anchor::new(x, y, ((target.0 - x).powi(2) + (target.1 - y).powi(2)).sqrt()))
}

/// 三角形足够"胖"：面积不小于最长边平方的 0.2 倍
fn well_conditioned(layout: &[(f64, f64); 3]) -> bool {
    let [(ax, ay), (bx, by), (cx, cy)] = *layout;
    let cross = (bx - ax) * (cy - ay) - (cx - ax) * (by - ay);
    let longest = [
        (ax - bx).powi(2) + (ay - by).powi(2),
        (bx - cx).powi(2) + (by - cy).powi(2),
        (ax - cx).powi(2) + (ay - cy).powi(2),
    ]
    .into_iter()
    .fold(0.0, f64::max);
    cross.abs() >= 0.2 * longest
}

proptest! {
    #[test]
    fn prop_scale_stays_in_grid(
        x in proptest::num::f64::ANY,
        y in proptest::num::f64::ANY,
        bound_x in 0.1f64..100.0,
        bound_y in 0.1f64..100.0,
        grid in 1u32..512,
    ) {
        let (gx, gy) = scale(x, y, bound_x, bound_y, grid);
        prop_assert!(gx < grid);
        prop_assert!(gy < grid);
    }

    #[test]
    fn prop_distance_strictly_decreasing(
        reference_power in -80.0f64..-20.0,
        exponent in 1.0f64..5.0,
        a in -127i16..=20,
        b in -127i16..=20,
    ) {
        prop_assume!(a != b);
        let (weak, strong) = if a < b { (a, b) } else { (b, a) };
        let model = RSSIModel::new(reference_power, exponent);
        prop_assert!(model.rssi_to_distance_i16(weak) > model.rssi_to_distance_i16(strong));
        prop_assert!(distance(strong as f64, reference_power, exponent) > 0.0);
    }

    #[test]
    fn prop_history_evicts_oldest(capacity in 1usize..20, extra in 1usize..30) {
        let mut history = ChannelHistory::new(capacity);
        let total = capacity + extra;
        for i in 0..total {
            history.push(SampleRecord {
                timestamp: Utc::now(),
                raw_rssi: -(i as i16),
                filtered_rssi: -(i as f64),
            });
        }
        prop_assert_eq!(history.len(), capacity);
        let raws: Vec<i16> = history.iter().map(|r| r.raw_rssi).collect();
        let expected: Vec<i16> = (extra..total).map(|i| -(i as i16)).collect();
        prop_assert_eq!(raws, expected);
        prop_assert_eq!(history.latest().map(|r| r.raw_rssi), Some(-((total - 1) as i16)));
    }

    #[test]
    fn prop_filter_converges(measurement in -100.0f64..-30.0) {
        let mut filter = ChannelFilter::new(&FilterConfig::default());
        let mut previous = filter.covariance();
        for _ in 0..200 {
            filter.step(measurement);
            prop_assert!(filter.covariance() <= previous + 1e-12);
            previous = filter.covariance();
        }
        prop_assert!((filter.estimate() - measurement).abs() < 1e-6);
    }

    #[test]
    fn prop_round_trip_inside_room(x in 0.05f64..3.15, y in 0.05f64..3.05) {
        let anchors = exact_anchors(DEFAULT_LAYOUT, (x, y));
        let fix = LeastSquaresSolver::default().solve(&anchors).unwrap();
        prop_assert!((fix.x - x).abs() < 1e-6, "x: {} vs {}", fix.x, x);
        prop_assert!((fix.y - y).abs() < 1e-6, "y: {} vs {}", fix.y, y);
    }

    #[test]
    fn prop_round_trip_any_layout(
        coords in proptest::array::uniform6(-10.0f64..10.0),
        x in -15.0f64..15.0,
        y in -15.0f64..15.0,
    ) {
        let layout = [(coords[0], coords[1]), (coords[2], coords[3]), (coords[4], coords[5])];
        prop_assume!(well_conditioned(&layout));

        let anchors = exact_anchors(layout, (x, y));
        let mut solver = LeastSquaresSolver::default().with_initial_guess(InitialGuess::Linear);
        let fix = solver.solve(&anchors).unwrap();
        prop_assert!((fix.x - x).abs() < 1e-6, "x: {} vs {}", fix.x, x);
        prop_assert!((fix.y - y).abs() < 1e-6, "y: {} vs {}", fix.y, y);

        let linear = LinearSolver.solve(&anchors).unwrap();
        prop_assert!((linear.x - x).abs() < 1e-6);
        prop_assert!((linear.y - y).abs() < 1e-6);
    }
}
