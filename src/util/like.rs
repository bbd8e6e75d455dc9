//! SQL `LIKE` pattern matching.

use crate::error::ExecError;

/// Matches `str` against the SQL `LIKE` pattern `pattern` with the default
/// escape character `\`.
pub fn like(s: &str, pattern: &str) -> Result<bool, ExecError> {
    like_with_escape(s, pattern, '\\')
}

/// Matches `str` against the SQL `LIKE` pattern `pattern`.
///
/// `_` matches exactly one character, `%` matches any (possibly empty)
/// sequence of characters.  A wildcard preceded by `escape` matches itself;
/// escaping any other character is an error.  Dynamic programming over the
/// (string, pattern) prefix table, O(|str| * |pattern|).
pub fn like_with_escape(s: &str, pattern: &str, escape: char) -> Result<bool, ExecError> {
    if escape == '_' || escape == '%' {
        return Err(ExecError::InvalidEscape(format!(
            "escape character must not be a wildcard: {escape}"
        )));
    }

    /// One resolved pattern element.
    enum Pat {
        Char(char),
        AnyOne,
        AnySeq,
    }

    let mut pat = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.next() {
                Some(e) if e == '_' || e == '%' || e == escape => pat.push(Pat::Char(e)),
                Some(e) => {
                    return Err(ExecError::InvalidEscape(format!("{escape}{e}")));
                }
                None => {
                    return Err(ExecError::InvalidEscape(format!(
                        "dangling escape character {escape}"
                    )));
                }
            }
        } else if c == '_' {
            pat.push(Pat::AnyOne);
        } else if c == '%' {
            pat.push(Pat::AnySeq);
        } else {
            pat.push(Pat::Char(c));
        }
    }

    let s: Vec<char> = s.chars().collect();

    // dp[j] == true iff pat[..i] matches s[..j]; rolled over i.
    let mut dp = vec![false; s.len() + 1];
    dp[0] = true;
    for p in &pat {
        match p {
            Pat::AnySeq => {
                // Matches any prefix extension: propagate left-to-right.
                for j in 1..=s.len() {
                    dp[j] = dp[j] || dp[j - 1];
                }
            }
            Pat::AnyOne => {
                for j in (1..=s.len()).rev() {
                    dp[j] = dp[j - 1];
                }
                dp[0] = false;
            }
            Pat::Char(c) => {
                for j in (1..=s.len()).rev() {
                    dp[j] = dp[j - 1] && s[j - 1] == *c;
                }
                dp[0] = false;
            }
        }
    }
    Ok(dp[s.len()])
}
