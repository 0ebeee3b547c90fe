//! Filter condition fragments.

use crate::error::Error;

/// A piece of a parsed filter condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentPiece {
    /// Verbatim SQL.
    Text(String),
    /// The alias of the filtered table.
    Alias,
    /// A filter parameter placeholder.
    Parameter(String),
}

/// A filter condition template parsed into pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterFragment {
    pieces: Vec<FragmentPiece>,
}

impl FilterFragment {
    /// Parse a template. `{alias}` marks the table alias and `:name` a
    /// parameter; text inside single quotes is copied verbatim.
    pub fn parse(template: &str) -> Result<Self, Error> {
        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut chars = template.char_indices().peekable();
        let mut quoted = false;

        while let Some((index, c)) = chars.next() {
            if quoted {
                text.push(c);
                if c == '\'' {
                    quoted = false;
                }
                continue;
            }
            match c {
                '\'' => {
                    quoted = true;
                    text.push(c);
                }
                '{' => {
                    if !template[index..].starts_with("{alias}") {
                        return Err(Error::Mapping(format!(
                            "unknown placeholder in filter condition '{}'",
                            template
                        )));
                    }
                    for _ in 0.."alias}".len() {
                        chars.next();
                    }
                    flush(&mut text, &mut pieces);
                    pieces.push(FragmentPiece::Alias);
                }
                ':' => match chars.peek() {
                    Some((_, next)) if next.is_ascii_alphabetic() || *next == '_' => {
                        let mut name = String::new();
                        while let Some((_, next)) = chars.peek() {
                            if next.is_ascii_alphanumeric() || *next == '_' {
                                name.push(*next);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        flush(&mut text, &mut pieces);
                        pieces.push(FragmentPiece::Parameter(name));
                    }
                    Some((_, ':')) => {
                        text.push_str("::");
                        chars.next();
                    }
                    _ => text.push(c),
                },
                _ => text.push(c),
            }
        }
        if quoted {
            return Err(Error::Mapping(format!(
                "unterminated string literal in filter condition '{}'",
                template
            )));
        }
        flush(&mut text, &mut pieces);
        Ok(Self { pieces })
    }

    /// The parsed pieces.
    pub fn pieces(&self) -> &[FragmentPiece] {
        &self.pieces
    }

    /// Parameter names in order of appearance.
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            FragmentPiece::Parameter(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn flush(text: &mut String, pieces: &mut Vec<FragmentPiece>) {
    if !text.is_empty() {
        pieces.push(FragmentPiece::Text(std::mem::take(text)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alias_and_parameter() {
        let fragment = FilterFragment::parse("{alias}.tenant_id = :tenantId").unwrap();
        assert_eq!(
            fragment.pieces(),
            &[
                FragmentPiece::Alias,
                FragmentPiece::Text(".tenant_id = ".into()),
                FragmentPiece::Parameter("tenantId".into()),
            ]
        );
        assert_eq!(fragment.parameters().collect::<Vec<_>>(), vec!["tenantId"]);
    }

    #[test]
    fn test_quoted_text_is_verbatim() {
        let fragment = FilterFragment::parse("{alias}.status <> ':closed'").unwrap();
        assert_eq!(fragment.parameters().count(), 0);
    }

    #[test]
    fn test_unknown_placeholder() {
        assert!(FilterFragment::parse("{table}.x = 1").is_err());
        assert!(FilterFragment::parse("{alias}.x = 'open").is_err());
    }
}
