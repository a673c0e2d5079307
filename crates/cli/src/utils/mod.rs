use anyhow::Result;

/// Split a `KEY=VALUE` flag. The value may itself contain `=`.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => anyhow::bail!("Invalid env entry '{pair}', expected KEY=VALUE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("DSN=postgres://u@h/db?a=b").unwrap(),
            ("DSN".to_string(), "postgres://u@h/db?a=b".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("NOVALUE").is_err());
        assert!(parse_env_pair("=x").is_err());
    }
}
