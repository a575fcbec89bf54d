use crate::parser::parse;

#[test]
fn test_error_reports_line_and_column() {
    let err = parse("SELECT a\nFROM t\nWHERE ???").unwrap_err();
    assert_eq!(err.line, 3);
    assert_eq!(err.column, 7);
    assert_eq!(err.expected, "expression");
}

#[test]
fn test_trailing_garbage_rejected() {
    let err = parse("SELECT a FROM t x y").unwrap_err();
    assert_eq!(err.expected, "end of statement");
    assert_eq!(err.found, "'y'");
}

#[test]
fn test_recursive_cte_rejected() {
    let err = parse("WITH RECURSIVE r AS (SELECT 1) SELECT * FROM r").unwrap_err();
    assert!(err.expected.contains("RECURSIVE"));
}

#[test]
fn test_nested_with_rejected() {
    assert!(parse("SELECT * FROM (WITH a AS (SELECT 1) SELECT * FROM a) s").is_err());
}

#[test]
fn test_missing_join_condition() {
    let err = parse("SELECT 1 FROM a JOIN b WHERE a.k = 1").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(err.offset > "SELECT 1 FROM a JOIN b".len() - 1);
}

#[test]
fn test_empty_input() {
    let err = parse("   ").unwrap_err();
    assert_eq!(err.found, "end of input");
}

#[test]
fn test_unterminated_string() {
    assert!(parse("SELECT 'abc FROM t").is_err());
}

#[test]
fn test_trailing_semicolon_only_once() {
    assert!(parse("SELECT 1;").is_ok());
    assert!(parse("SELECT 1;;").is_err());
}
