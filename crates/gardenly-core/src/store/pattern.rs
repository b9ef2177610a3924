use std::fmt;
use std::str::FromStr;

use crate::address::{Address, TREE_DELIMITER};
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    /// `*`: exactly one segment.
    One,
    /// `**`: zero or more segments.
    Any,
}

/// Glob over addresses: `*` matches one segment, `**` any number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPattern {
    parts: Vec<Part>,
}

impl AddressPattern {
    /// Everything under `prefix`, excluding the prefix itself.
    pub fn under(prefix: &Address) -> Self {
        let mut parts: Vec<Part> = prefix
            .segments()
            .iter()
            .map(|s| Part::Literal(s.clone()))
            .collect();
        parts.push(Part::One);
        parts.push(Part::Any);
        Self { parts }
    }

    pub fn matches(&self, address: &Address) -> bool {
        match_parts(&self.parts, address.segments())
    }
}

fn match_parts(parts: &[Part], segments: &[String]) -> bool {
    match parts.split_first() {
        None => segments.is_empty(),
        Some((Part::Any, rest)) => {
            (0..=segments.len()).any(|skip| match_parts(rest, &segments[skip..]))
        }
        Some((part, rest)) => match segments.split_first() {
            Some((head, tail)) => {
                let ok = match part {
                    Part::Literal(lit) => lit == head,
                    Part::One | Part::Any => true,
                };
                ok && match_parts(rest, tail)
            }
            None => false,
        },
    }
}

impl FromStr for AddressPattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(TREE_DELIMITER)
            .map(|segment| match segment {
                "" => Err(CoreError::MalformedAddress { address: s.into() }),
                "*" => Ok(Part::One),
                "**" => Ok(Part::Any),
                lit => Ok(Part::Literal(lit.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { parts })
    }
}

impl fmt::Display for AddressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "{TREE_DELIMITER}")?;
            }
            match part {
                Part::Literal(lit) => f.write_str(lit)?,
                Part::One => f.write_str("*")?,
                Part::Any => f.write_str("**")?,
            }
        }
        Ok(())
    }
}
