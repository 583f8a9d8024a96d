//! Symbolic reference names (`R12`, `V1.5`, `T.DiM`, `F2.Start`, `M1.1`, ...)
//! parsed into a small, `Copy`-friendly tagged union.
//!
//! Every formula and every entry in the reference map is keyed by one of
//! these. Parsing is hand-rolled (no regex): the grammar is simple enough
//! that a single left-to-right scan is both faster and clearer.

use std::fmt;

/// Which part of a key-period flag a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagPart {
    /// `F<id>` itself: 1 while the key period is active.
    Active,
    /// `F<id>.Start`: one-hot at the key period's first in-range period.
    Start,
    /// `F<id>.End`: one-hot at the key period's last in-range period.
    End,
}

/// The normalized input-group mode, and the family-prefix letter it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupFamily {
    Timing,
    Constant,
    Series,
    Lookup,
    Values,
}

impl GroupFamily {
    pub fn prefix(self) -> char {
        match self {
            GroupFamily::Timing => 'T',
            GroupFamily::Constant => 'C',
            GroupFamily::Series => 'S',
            GroupFamily::Lookup => 'L',
            GroupFamily::Values => 'V',
        }
    }
}

/// A parsed symbolic reference. See the reference-family table in the
/// reference map builder for what populates each variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// `T.<Name>`: a calendar constant produced by the timeline.
    Calendar(String),
    /// `F<id>`, `F<id>.Start`, `F<id>.End`.
    Flag { id: u32, part: FlagPart },
    /// `I<id>`: an indexation factor.
    Index(u32),
    /// `R<id>`: a formula output.
    Formula(u32),
    /// `M<module>.<output>`: a module solver output (1-based output index).
    Module { module: u32, output: u32 },
    /// `V<n>`, `S<n>`, `C<n>`, `L<n>`, `T<n>` and their `.<item>` forms.
    Group {
        family: GroupFamily,
        group: u32,
        item: Option<u32>,
    },
}

impl RefKind {
    /// Parse a reference name. Returns `None` for anything that doesn't
    /// match one of the known families (the caller treats that as an
    /// ordinary unresolved reference, not a parse error).
    pub fn parse(s: &str) -> Option<RefKind> {
        let mut chars = s.chars();
        let family_char = chars.next()?;
        let rest = chars.as_str();
        match family_char {
            'T' => {
                if let Some(name) = rest.strip_prefix('.') {
                    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic()) {
                        return Some(RefKind::Calendar(name.to_string()));
                    }
                    return None;
                }
                parse_group(GroupFamily::Timing, rest)
            }
            'F' => parse_flag(rest),
            'I' => parse_digits(rest).map(RefKind::Index),
            'R' => parse_digits(rest).map(RefKind::Formula),
            'M' => parse_module(rest),
            'V' => parse_group(GroupFamily::Values, rest),
            'S' => parse_group(GroupFamily::Series, rest),
            'C' => parse_group(GroupFamily::Constant, rest),
            'L' => parse_group(GroupFamily::Lookup, rest),
            _ => None,
        }
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_flag(rest: &str) -> Option<RefKind> {
    if let Some(base) = rest.strip_suffix(".Start") {
        return parse_digits(base).map(|id| RefKind::Flag {
            id,
            part: FlagPart::Start,
        });
    }
    if let Some(base) = rest.strip_suffix(".End") {
        return parse_digits(base).map(|id| RefKind::Flag {
            id,
            part: FlagPart::End,
        });
    }
    parse_digits(rest).map(|id| RefKind::Flag {
        id,
        part: FlagPart::Active,
    })
}

fn parse_module(rest: &str) -> Option<RefKind> {
    let mut parts = rest.splitn(2, '.');
    let module = parse_digits(parts.next()?)?;
    let output = parse_digits(parts.next()?)?;
    Some(RefKind::Module { module, output })
}

fn parse_group(family: GroupFamily, rest: &str) -> Option<RefKind> {
    let mut parts = rest.split('.');
    let group = parse_digits(parts.next()?)?;
    let item = match parts.next() {
        None => None,
        Some(p) => Some(parse_digits(p)?),
    };
    if parts.next().is_some() {
        return None;
    }
    Some(RefKind::Group {
        family,
        group,
        item,
    })
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Calendar(name) => write!(f, "T.{name}"),
            RefKind::Flag { id, part } => match part {
                FlagPart::Active => write!(f, "F{id}"),
                FlagPart::Start => write!(f, "F{id}.Start"),
                FlagPart::End => write!(f, "F{id}.End"),
            },
            RefKind::Index(id) => write!(f, "I{id}"),
            RefKind::Formula(id) => write!(f, "R{id}"),
            RefKind::Module { module, output } => write!(f, "M{module}.{output}"),
            RefKind::Group {
                family,
                group,
                item,
            } => match item {
                Some(item) => write!(f, "{}{}.{}", family.prefix(), group, item),
                None => write!(f, "{}{}", family.prefix(), group),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_family() {
        assert_eq!(RefKind::parse("T.DiM"), Some(RefKind::Calendar("DiM".into())));
        assert_eq!(
            RefKind::parse("F2.Start"),
            Some(RefKind::Flag {
                id: 2,
                part: FlagPart::Start
            })
        );
        assert_eq!(RefKind::parse("I1"), Some(RefKind::Index(1)));
        assert_eq!(RefKind::parse("R12"), Some(RefKind::Formula(12)));
        assert_eq!(
            RefKind::parse("M1.1"),
            Some(RefKind::Module {
                module: 1,
                output: 1
            })
        );
        assert_eq!(
            RefKind::parse("V1.5"),
            Some(RefKind::Group {
                family: GroupFamily::Values,
                group: 1,
                item: Some(5)
            })
        );
        assert_eq!(
            RefKind::parse("C1"),
            Some(RefKind::Group {
                family: GroupFamily::Constant,
                group: 1,
                item: None
            })
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(RefKind::parse(""), None);
        assert_eq!(RefKind::parse("X1"), None);
        assert_eq!(RefKind::parse("T."), None);
        assert_eq!(RefKind::parse("T.1"), None);
        assert_eq!(RefKind::parse("R"), None);
        assert_eq!(RefKind::parse("R1a"), None);
    }

    #[test]
    fn round_trips_display() {
        for s in ["T.DiM", "F2.Start", "F2.End", "F2", "I1", "R12", "M1.1", "V1.5", "C1"] {
            let parsed = RefKind::parse(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }
}
