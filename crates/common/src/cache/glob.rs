/// Match `text` against a glob pattern.
///
/// `*` matches any run of characters, `?` exactly one, and `\` makes the
/// following character literal.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last `*` and the text index it was matched against
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                t += 1;
                continue;
            }
            Some('\\') if pattern.get(p + 1) == Some(&text[t]) => {
                p += 2;
                t += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            _ => {}
        }

        match star {
            Some((after_star, matched)) => {
                p = after_star;
                t = matched + 1;
                star = Some((after_star, matched + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_matches("machines:all", "machines:all"));
        assert!(!glob_matches("machines:all", "machines:al"));
        assert!(!glob_matches("machine", "machines"));
    }

    #[test]
    fn test_star() {
        assert!(glob_matches("machine:*", "machine:1"));
        assert!(glob_matches("machine:*", "machine:"));
        assert!(!glob_matches("machine:*", "machines:all"));
        assert!(glob_matches("machines:*", "machines:all"));
        assert!(glob_matches("*:all", "machines:all"));
        assert!(glob_matches("m*e*1", "machine:1"));
        assert!(glob_matches("*", ""));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_matches("machine:?", "machine:7"));
        assert!(!glob_matches("machine:?", "machine:42"));
    }

    #[test]
    fn test_escape() {
        assert!(glob_matches(r"a\*b", "a*b"));
        assert!(!glob_matches(r"a\*b", "axb"));
        assert!(glob_matches(r"what\?", "what?"));
    }
}
