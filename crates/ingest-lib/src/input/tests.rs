//! Integration tests for input discovery and parsing
//!
//! These tests build small export trees on disk with `tempfile` and run the
//! discoverer and parser against them.

#[cfg(test)]
mod discovery_tests {
    use crate::input::{discover, DiscoveryError, DEFAULT_FILE_SUFFIX};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_matches_suffix_recursively() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a_明细.csv"), "header\n").unwrap();
        fs::write(root.join("b.csv"), "header\n").unwrap();
        fs::write(root.join("sub").join("c_明细.csv"), "header\n").unwrap();

        let files = discover(root, DEFAULT_FILE_SUFFIX).unwrap();

        assert_eq!(
            files,
            vec![root.join("a_明细.csv"), root.join("sub").join("c_明细.csv")]
        );
    }

    #[test]
    fn test_discover_order_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["z_明细.csv", "m_明细.csv", "a_明细.csv"] {
            fs::write(root.join(name), "").unwrap();
        }

        let first = discover(root, DEFAULT_FILE_SUFFIX).unwrap();
        let second = discover(root, DEFAULT_FILE_SUFFIX).unwrap();

        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_discover_skips_matching_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("dir_明细.csv")).unwrap();

        let files = discover(root, DEFAULT_FILE_SUFFIX).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_empty_root_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let files = discover(temp_dir.path(), DEFAULT_FILE_SUFFIX).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_discover_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");

        let err = discover(&missing, DEFAULT_FILE_SUFFIX).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(p) if p == missing));
    }

    #[test]
    fn test_discover_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("x_明细.csv");
        fs::write(&file, "").unwrap();

        let err = discover(&file, DEFAULT_FILE_SUFFIX).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotADirectory(_)));
    }
}

#[cfg(test)]
mod parser_tests {
    use crate::input::{parse_file, ParseError};
    use crate::schema::format_timestamp;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str =
        "service_name,endpoint,timestamp,cpm,latency,query_start_time,query_end_time\n";

    fn write(temp_dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = temp_dir.path().join(name);
        fs::write(&path, format!("{HEADER}{body}")).unwrap();
        path
    }

    #[test]
    fn test_parse_valid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(
            &temp_dir,
            "ok_明细.csv",
            "orders,/api/orders,2024-03-01 0930,12,3.5,2024-03-01 0900,2024-03-01 1000\n\
             users,/api/users,2024-03-01 0931,8.5,1.25,2024-03-01 0900,2024-03-01 1000\n",
        );

        let parsed = parse_file(&path).unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.records[0].service_name, "orders");
        assert_eq!(format_timestamp(&parsed.records[1].sample_time), "2024-03-01 0931");
        assert_eq!(parsed.records[1].latency, 1.25);
    }

    #[test]
    fn test_parse_drops_invalid_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(
            &temp_dir,
            "mixed_明细.csv",
            "orders,/a,2024-03-01 0930,12,3.5,2024-03-01 0900,2024-03-01 1000\n\
             orders,/b,2024-03-01 09:30,12,3.5,2024-03-01 0900,2024-03-01 1000\n\
             orders,/c,2024-03-01 0930,twelve,3.5,2024-03-01 0900,2024-03-01 1000\n\
             orders,/d,2024-03-01 0930,12\n\
             orders,/e,2024-03-01 0932,1,1,2024-03-01 0900,2024-03-01 1000\n",
        );

        let parsed = parse_file(&path).unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 3);
        assert_eq!(parsed.records[0].endpoint, "/a");
        assert_eq!(parsed.records[1].endpoint, "/e");
    }

    #[test]
    fn test_parse_only_invalid_rows_is_empty_success() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(
            &temp_dir,
            "bad_明细.csv",
            "orders,/a,yesterday,12,3.5,2024-03-01 0900,2024-03-01 1000\n",
        );

        let parsed = parse_file(&path).unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn test_parse_header_only_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(&temp_dir, "empty_明细.csv", "");

        let parsed = parse_file(&path).unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn test_parse_quoted_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = write(
            &temp_dir,
            "quoted_明细.csv",
            "\"svc, eu\",\"/api/x?a=1,b=2\",2024-03-01 0930,1,2,2024-03-01 0900,2024-03-01 1000\n",
        );

        let parsed = parse_file(&path).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].service_name, "svc, eu");
        assert_eq!(parsed.records[0].endpoint, "/api/x?a=1,b=2");
    }

    #[test]
    fn test_parse_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = parse_file(&temp_dir.path().join("gone.csv")).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }

    #[test]
    fn test_parse_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("latin1_明细.csv");
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"caf\xe9,/a,2024-03-01 0930,1,2,2024-03-01 0900,2024-03-01 1000\n");
        fs::write(&path, bytes).unwrap();

        let err = parse_file(&path).unwrap_err();
        assert!(matches!(err, ParseError::Encoding { .. }), "{err:?}");
    }
}
