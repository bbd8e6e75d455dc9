// tests/util/like_test.rs
use quillsql::error::ExecError;
use quillsql::util::like;

#[test]
fn test_like_without_wildcards() {
    let cases = [
        ("", "", true),
        ("a", "", false),
        (" ", "", false),
        ("", "a", false),
        ("a", "a", true),
        ("A", "a", false),
        ("a", "A", false),
        ("abc", "abc", true),
        ("ab", "abc", false),
        ("abcd", "abc", false),
        ("cba", "abc", false),
        ("\\", "\\\\", true),
        ("\\a", "\\\\_", true),
        ("\\ab", "\\\\%", true),
        ("_", "\\_", true),
        ("\\a", "\\_", false),
        ("%", "\\%", true),
        ("\\ab", "\\%", false),
    ];
    for (s, p, expected) in cases {
        assert_eq!(like(s, p).unwrap(), expected, "string {s:?} pattern {p:?}");
    }
}

#[test]
fn test_like_underscore_wildcard() {
    let cases = [
        ("", "_", false),
        ("a", "_", true),
        (" ", "_", true),
        ("aa", "_", false),
        ("a", "a_", false),
        ("ab", "a_", true),
        ("abc", "a_", false),
        ("axbyzc", "a_b__c", true),
        ("axbyc", "a_b__c", false),
        ("axbyz", "a_b__c", false),
        ("axbyzcd", "a_b__c", false),
        ("axcyzc", "a_b__c", false),
        ("xbyzc", "a_b__c", false),
        ("axybyzc", "a_b__c", false),
        ("axbyzqc", "a_b__c", false),
    ];
    for (s, p, expected) in cases {
        assert_eq!(like(s, p).unwrap(), expected, "string {s:?} pattern {p:?}");
    }
}

#[test]
fn test_like_percent_wildcard() {
    let cases = [
        ("", "%", true),
        ("a", "%", true),
        ("abc", "%", true),
        ("", "a%", false),
        ("a", "a%", true),
        ("abc", "a%", true),
        ("b", "a%", false),
        ("bac", "a%", false),
        ("abc", "a%b%%c", true),
        ("axyzbc", "a%b%%c", true),
        ("abxyzc", "a%b%%c", true),
        ("axyzbrstc", "a%b%%c", true),
        ("axyzbrst", "a%b%%c", false),
        ("axyzbrstcd", "a%b%%c", false),
        ("axyzcrstc", "a%b%%c", false),
        ("xyzbrstc", "a%b%%c", false),
    ];
    for (s, p, expected) in cases {
        assert_eq!(like(s, p).unwrap(), expected, "string {s:?} pattern {p:?}");
    }
}

#[test]
fn test_like_complex_patterns() {
    let cases = [
        ("xabcyzdqe", "%_ab%c__d%e", true),
        ("rstabuvwcxydqlmke", "%_ab%c__d%e", true),
        ("abcyzdqe", "%_ab%c__d%e", false),
        ("xabcydqe", "%_ab%c__d%e", false),
        ("xabcyzdq", "%_ab%c__d%e", false),
        ("xyz_u%vw", "%\\__\\%%", true),
        ("_u%", "%\\__\\%%", true),
        ("xyz\\uv%abc", "%\\__\\%%", false),
        ("xyz_u\\vw", "%\\__\\%%", false),
    ];
    for (s, p, expected) in cases {
        assert_eq!(like(s, p).unwrap(), expected, "string {s:?} pattern {p:?}");
    }
}

#[test]
fn test_invalid_escape_sequences_are_errors() {
    for pattern in ["abc\\x", "\\x\\y\\z", "\\\\\\"] {
        assert!(
            matches!(like("abc", pattern), Err(ExecError::InvalidEscape(_))),
            "pattern {pattern:?}"
        );
    }
}
