use aliri_braid::braid;
use std::fmt;

/// Redacts a secret unless the alternate flag (`{:#}` / `{:#?}`) is given
///
/// In alternate mode, at most `width` (or the default) characters are shown
/// with an ellipsis marking the cut.
macro_rules! redacted {
    ($ty:ty: $label:literal, $reveal:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    write!(f, "\"")?;
                    reveal_prefix(&self.0, &mut *f, $reveal)?;
                    write!(f, "\"")
                } else {
                    f.write_str(concat!("<", $label, ">"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("<", $label, ">"))
                }
            }
        }
    };
}

fn reveal_prefix(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let limit = f.width().unwrap_or(default_len);
    if limit <= 1 {
        return f.write_str("…");
    }

    if secret.chars().count() < limit {
        return f.write_str(secret);
    }

    let cut = secret
        .char_indices()
        .nth(limit - 1)
        .map_or(secret.len(), |(idx, _)| idx);
    f.write_str(&secret[..cut])?;
    f.write_str("…")
}

/// An access token, as attached to outgoing requests
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "access token", 12);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_formatting_hides_the_token() {
        let token = AccessToken::from_static("secret-bearer-value");
        assert_eq!(format!("{}", token), "<access token>");
        assert_eq!(format!("{:?}", token), "<access token>");
    }

    #[test]
    fn alternate_formatting_reveals_a_prefix() {
        let token = AccessToken::from_static("secret-bearer-value");
        assert_eq!(format!("{:#}", token), "secret-bearer-value");
        assert_eq!(format!("{:#?}", token), "\"secret-bear…\"");
        assert_eq!(format!("{:#4?}", token), "\"sec…\"");
    }

    #[test]
    fn short_tokens_are_shown_whole() {
        let token = AccessToken::from_static("T1");
        assert_eq!(format!("{:#?}", token), "\"T1\"");
    }
}
