//! Quote-aware splitting of a command string into executable and arguments.
//!
//! Only whitespace separation and double-quoted runs are understood; there is
//! no escaping, globbing or variable expansion. Commands that need any of that
//! should enable the shell.

/// Split `command` on whitespace, keeping double-quoted runs as one token.
///
/// Quotes are stripped. A quoted run glued to surrounding text stays part of
/// the same token, so `--name="a b"` yields `--name=a b`.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in command.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if has_token {
        tokens.push(current);
    }

    tokens
}

/// Split into `(program, args)`, `None` for a blank command.
pub fn split_program(command: &str) -> Option<(String, Vec<String>)> {
    let mut tokens = tokenize(command).into_iter();
    let program = tokens.next()?;
    Some((program, tokens.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_split() {
        assert_eq!(tokenize("git  status   -s"), vec!["git", "status", "-s"]);
    }

    #[test]
    fn test_double_quotes_form_one_token() {
        assert_eq!(tokenize(r#"echo "a b""#), vec!["echo", "a b"]);
        assert_eq!(
            tokenize(r#"git commit -m "fix the  build""#),
            vec!["git", "commit", "-m", "fix the  build"]
        );
    }

    #[test]
    fn test_empty_quotes_are_kept() {
        assert_eq!(tokenize(r#"printf """#), vec!["printf", ""]);
    }

    #[test]
    fn test_quotes_glued_to_text() {
        assert_eq!(tokenize(r#"--name="a b" x"#), vec!["--name=a b", "x"]);
    }

    #[test]
    fn test_split_program() {
        let (program, args) = split_program("ls -la /tmp").unwrap();
        assert_eq!(program, "ls");
        assert_eq!(args, vec!["-la", "/tmp"]);
        assert!(split_program("   ").is_none());
    }
}
