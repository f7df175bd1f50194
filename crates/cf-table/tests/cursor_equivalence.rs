//! Cursor and mode behaviour on whole tables.

use cf_table::{ColumnMap, Cursor, InterpMode, Table, TableBuilder};
use proptest::prelude::*;

fn expansion_table(rows: usize) -> Table {
    let cols = ColumnMap::builder()
        .push("a")
        .push("z")
        .push("H")
        .build()
        .unwrap();
    let mut b = TableBuilder::new(cols).axis("a").unwrap().axis("z").unwrap();
    for i in 0..rows {
        let a = 1e-3 * (1000.0_f64).powf(i as f64 / (rows - 1) as f64);
        let h = (0.3 / a.powi(3) + 0.7).sqrt();
        b.push_row(&[a, 1.0 / a - 1.0, h]).unwrap();
    }
    b.finish().unwrap()
}

#[test]
fn monotone_sweep_with_warm_cursor_matches_bisection() {
    let t = expansion_table(200);
    let z = t.require("z").unwrap();
    let h = t.require("H").unwrap();
    let mut warm = Cursor::default();
    for i in 0..500 {
        let zq = 0.5 + 997.5 * (1.0 - i as f64 / 499.0);
        let a = t
            .interpolate_one(z, zq, h, InterpMode::GrowingCloseby, &mut warm)
            .unwrap();
        let b = t
            .interpolate_one(z, zq, h, InterpMode::Normal, &mut Cursor::default())
            .unwrap();
        assert_eq!(a, b, "z = {zq}");
    }
}

#[test]
fn query_errors_leave_table_usable() {
    let t = expansion_table(50);
    let z = t.require("z").unwrap();
    let mut c = Cursor::default();
    assert!(t.interpolate_all(z, 1e4, InterpMode::Normal, &mut c).is_err());
    let row = t.interpolate_all(z, 1.0, InterpMode::Normal, &mut c).unwrap();
    assert_eq!(row.len(), 3);
    assert!((row[0] - 0.5).abs() < 1e-4);
}

proptest! {
    #[test]
    fn fresh_cursor_equivalence(zq in 0.5_f64..998.0, seed in 0_usize..200) {
        let t = expansion_table(120);
        let z = t.require("z").unwrap();
        let all_normal = t.interpolate_all(z, zq, InterpMode::Normal, &mut Cursor::default()).unwrap();
        // warm the cursor somewhere unrelated first
        let mut c = Cursor::default();
        let start = 0.5 + 997.0 * (seed as f64 / 200.0);
        t.interpolate_all(z, start, InterpMode::GrowingCloseby, &mut c).unwrap();
        let all_walk = t.interpolate_all(z, zq, InterpMode::GrowingCloseby, &mut c).unwrap();
        prop_assert_eq!(all_normal, all_walk);
    }
}
