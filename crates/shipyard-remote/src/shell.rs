//! Shell quoting

/// Wrap `value` in single quotes so `sh` passes it through verbatim
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("bin/rails db:migrate"), "'bin/rails db:migrate'");
    }

    #[test]
    fn test_quote_embedded_single_quote() {
        assert_eq!(quote("echo 'hi'"), r#"'echo '"'"'hi'"'"''"#);
    }
}
