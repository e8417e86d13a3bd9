use tiletd::pattern::{DEFAULT_ALPHABET, NTupleConfig, load_patterns};

#[test]
fn test_load_patterns_from_project_file() {
    // Test loading patterns.csv from the project root
    let patterns = load_patterns("patterns.csv").expect("patterns.csv should load");
    assert_eq!(patterns.len(), 32, "Should have 32 patterns");

    // 24 five-cell patterns followed by 8 four-cell rows and columns
    assert!(patterns[..24].iter().all(|p| p.k == 5));
    assert!(patterns[24..].iter().all(|p| p.k == 4));

    let first = &patterns[0];
    assert_eq!(first.id, 0);
    assert_eq!(first.cells(), &[0, 1, 2, 3, 4]);

    let last = &patterns[31];
    assert_eq!(last.id, 31);
    assert_eq!(last.cells(), &[3, 7, 11, 15]);
}

#[test]
fn test_project_file_matches_builtin_set() {
    let from_file = NTupleConfig::from_csv(DEFAULT_ALPHABET, "patterns.csv").unwrap();
    let builtin = NTupleConfig::default();

    assert_eq!(from_file, builtin);
    assert_eq!(from_file.fingerprint(), builtin.fingerprint());
    assert_eq!(builtin.table_size(0), 31usize.pow(5));
    assert_eq!(builtin.table_size(31), 31usize.pow(4));
}
