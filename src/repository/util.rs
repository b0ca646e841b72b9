//! Repository utilities.

use super::{Result, StoreError};

/// Quote a table or column name after checking it is a plain identifier.
///
/// Column names come from record keys, so anything beyond
/// `[A-Za-z_][A-Za-z0-9_]*` is rejected rather than escaped.
pub fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote a list of identifiers and join them with commas.
pub fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<String> {
    names
        .into_iter()
        .map(quote_ident)
        .collect::<Result<Vec<_>>>()
        .map(|quoted| quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("ms_raw").unwrap(), "\"ms_raw\"");
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1abc").is_err());
        assert!(quote_ident("name; DROP TABLE x").is_err());
        assert!(quote_ident("a\"b").is_err());
    }

    #[test]
    fn test_quote_list() {
        assert_eq!(quote_list(["a", "b"]).unwrap(), "\"a\", \"b\"");
    }
}
