use nalgebra::Point3;
use proptest::prelude::*;

use dicom_rigid::origin_resolver::{SliceRecord, resolve, sort_stack, stack_normal};

const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
// Rows along x, columns tilted 30 degrees between y and z.
const OBLIQUE: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 0.866_025_403_784_438_6, 0.5];

fn stack(offsets: &[f64], orientation: [f64; 6]) -> Vec<SliceRecord> {
    let normal = stack_normal(&orientation)
        .expect("valid orientation")
        .2;
    offsets
        .iter()
        .enumerate()
        .map(|(i, d)| {
            SliceRecord::new(format!("IM{i:04}"))
                .with_position(Point3::new(-120.0, -80.0, 30.0) + normal * *d)
                .with_orientation(orientation)
                .with_instance_number(i as i32 + 1)
        })
        .collect()
}

#[test]
fn ten_slice_stack_origin_is_order_independent() {
    let offsets: Vec<f64> = (0..10).map(|k| f64::from(k) * 2.5).collect();
    let records = stack(&offsets, AXIAL);
    let expected = resolve(&records).unwrap();
    assert!((expected - Point3::new(-120.0, -80.0, 30.0)).norm() < 1e-6);

    for shift in [1, 3, 4, 7, 9] {
        let mut shuffled = records.clone();
        shuffled.rotate_left(shift);
        shuffled.swap(0, 5);
        let origin = resolve(&shuffled).unwrap();
        assert!((origin - expected).norm() < 1e-6);
    }
}

proptest! {
    #[test]
    fn origin_ignores_file_order(
        (offsets, shuffled) in prop::collection::vec(-300.0f64..300.0, 1..24)
            .prop_flat_map(|offsets| (Just(offsets.clone()), Just(offsets).prop_shuffle())),
        oblique in any::<bool>(),
    ) {
        let orientation = if oblique { OBLIQUE } else { AXIAL };
        let a = resolve(&stack(&offsets, orientation)).unwrap();
        let b = resolve(&stack(&shuffled, orientation)).unwrap();
        prop_assert!((a - b).norm() < 1e-6);

        let lowest = offsets.iter().copied().fold(f64::INFINITY, f64::min);
        let expected = stack(&[lowest], orientation)[0].position.unwrap();
        prop_assert!((a - expected).norm() < 1e-6);

        let sorted = sort_stack(&stack(&shuffled, orientation)).unwrap();
        prop_assert!(sorted.projections.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(sorted.order.len(), offsets.len());
    }
}
