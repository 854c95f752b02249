//! Single cron field parsing
//!
//! A field is compiled into a 64-bit mask of the values it selects, which
//! keeps matching allocation-free and the parsed expression trivially
//! immutable.

use crate::errors::CronParseError;

/// Static description of one of the five cron fields
#[derive(Debug)]
pub(crate) struct FieldSpec {
    pub name: &'static str,
    pub min: u32,
    pub max: u32,
    /// Symbolic names accepted in place of numbers, starting at `alias_base`
    aliases: &'static [&'static str],
    alias_base: u32,
}

pub(crate) const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    aliases: &[],
    alias_base: 0,
};

pub(crate) const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    aliases: &[],
    alias_base: 0,
};

pub(crate) const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    aliases: &[],
    alias_base: 0,
};

pub(crate) const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    aliases: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
    alias_base: 1,
};

/// Day-of-week accepts 7 as an alias for Sunday; it is folded onto 0 after parsing.
pub(crate) const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    aliases: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
    alias_base: 0,
};

impl FieldSpec {
    fn value(&self, token: &str) -> Result<u32, CronParseError> {
        if let Ok(value) = token.parse::<u32>() {
            if value < self.min || value > self.max {
                return Err(CronParseError::OutOfRange {
                    field: self.name,
                    value,
                    min: self.min,
                    max: self.max,
                });
            }
            return Ok(value);
        }

        let lowered = token.to_ascii_lowercase();
        self.aliases
            .iter()
            .position(|alias| *alias == lowered)
            .map(|index| self.alias_base + index as u32)
            .ok_or_else(|| CronParseError::InvalidToken {
                field: self.name,
                token: token.to_string(),
                reason: "not a number or known name".to_string(),
            })
    }

    fn step(&self, token: &str) -> Result<u32, CronParseError> {
        match token.parse::<u32>() {
            Ok(0) => Err(CronParseError::ZeroStep { field: self.name }),
            Ok(step) => Ok(step),
            Err(_) => Err(CronParseError::InvalidToken {
                field: self.name,
                token: token.to_string(),
                reason: "step is not a number".to_string(),
            }),
        }
    }
}

/// The set of values selected by one cron field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronField {
    bits: u64,
    restricted: bool,
}

impl CronField {
    /// Parse a field such as `*/15`, `1-5`, `mon,wed,fri` or `0-30/10`
    pub(crate) fn parse(text: &str, spec: &FieldSpec) -> Result<Self, CronParseError> {
        let mut bits = 0u64;

        for part in text.split(',') {
            if part.is_empty() {
                return Err(CronParseError::InvalidToken {
                    field: spec.name,
                    token: text.to_string(),
                    reason: "empty list element".to_string(),
                });
            }

            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(spec.step(step)?)),
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (spec.min, spec.max)
            } else if let Some((from, to)) = base.split_once('-') {
                let start = spec.value(from)?;
                let end = spec.value(to)?;
                if start > end {
                    return Err(CronParseError::InvertedRange {
                        field: spec.name,
                        start,
                        end,
                    });
                }
                (start, end)
            } else {
                let start = spec.value(base)?;
                // `a/n` runs from a to the end of the field
                if step.is_some() {
                    (start, spec.max)
                } else {
                    (start, start)
                }
            };

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                bits |= 1 << value;
                let Some(next) = value.checked_add(step) else {
                    break;
                };
                value = next;
            }
        }

        // Sunday may be written as 7
        if spec.max == 7 && bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            bits,
            restricted: !(text == "*" || text == "*/1"),
        })
    }

    /// Whether this field selects `value`
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    /// False when the field was written as a bare wildcard
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Selected values in ascending order
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64u32).filter(move |value| self.contains(*value))
    }
}
