// Integration tests for well-plate grid generation

#[cfg(test)]
mod tests {
    use wellhost_rs::wells::{PlateGeometry, WellGrid, WellGridError, ROW_LETTERS};

    fn geometry(rows: usize, cols: usize) -> PlateGeometry {
        PlateGeometry {
            origin_x: 10.0,
            origin_y: 10.0,
            row_pitch: -5.0,
            col_pitch: -5.0,
            rows,
            cols,
        }
    }

    #[test]
    fn test_two_by_two_layout() {
        let grid = WellGrid::generate(&geometry(2, 2)).unwrap();
        let wells: Vec<(&str, (f64, f64))> = grid.iter().collect();
        assert_eq!(
            wells,
            vec![
                ("A1", (10.0, 10.0)),
                ("B1", (5.0, 10.0)),
                ("A2", (10.0, 5.0)),
                ("B2", (5.0, 5.0)),
            ]
        );
    }

    #[test]
    fn test_rows_follow_x_and_columns_follow_y() {
        let grid = WellGrid::generate(&PlateGeometry {
            origin_x: 100.0,
            origin_y: 20.0,
            row_pitch: 9.0,
            col_pitch: -4.5,
            rows: 3,
            cols: 4,
        })
        .unwrap();
        assert_eq!(grid.len(), 12);
        assert_eq!(grid.get("C1"), Some((118.0, 20.0)));
        assert_eq!(grid.get("A4"), Some((100.0, 6.5)));
        assert_eq!(grid.get("D1"), None);
        assert_eq!(grid.get("A5"), None);
        assert_eq!(&grid.names()[..4], &["A1", "B1", "C1", "A2"]);
    }

    #[test]
    fn test_row_alphabet_limit() {
        assert_eq!(ROW_LETTERS.len(), 16);
        let grid = WellGrid::generate(&geometry(16, 1)).unwrap();
        assert_eq!(grid.names().last(), Some(&"P1"));
        assert_eq!(
            WellGrid::generate(&geometry(17, 1)),
            Err(WellGridError::TooManyRows { rows: 17, max: 16 })
        );
    }

    #[test]
    fn test_degenerate_geometry() {
        assert!(matches!(WellGrid::generate(&geometry(0, 12)), Err(WellGridError::Empty { .. })));
        assert!(matches!(WellGrid::generate(&geometry(8, 0)), Err(WellGridError::Empty { .. })));
        let mut bad = geometry(2, 2);
        bad.row_pitch = f64::INFINITY;
        assert_eq!(WellGrid::generate(&bad), Err(WellGridError::NonFinite));
    }

    #[test]
    fn test_geometry_from_toml() {
        let geometry: PlateGeometry = toml::from_str(
            r#"
            origin_x = -50.0
            origin_y = 30.0
            row_pitch = 9.0
            col_pitch = 9.0
            rows = 8
            cols = 12
            "#,
        )
        .unwrap();
        assert_eq!(geometry, PlateGeometry::standard_96(-50.0, 30.0));
        let grid = WellGrid::generate(&geometry).unwrap();
        assert_eq!(grid.get("H12"), Some((13.0, 129.0)));
    }
}
